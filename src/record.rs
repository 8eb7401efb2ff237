// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Protobuf wire form of record arguments.
//
// Messages are derived by hand with `prost` so no .proto compilation step is
// needed. Field order is preserved by the repeated field.

use prost::Message;

use crate::error::ProtocolViolation;
use crate::kind::Kind;
use crate::value::Field;

#[derive(Clone, PartialEq, Message)]
pub(crate) struct RecordMsg {
    #[prost(message, repeated, tag = "1")]
    pub fields: Vec<FieldMsg>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct FieldMsg {
    #[prost(oneof = "field_msg::Value", tags = "1, 2, 3")]
    pub value: Option<field_msg::Value>,
}

pub(crate) mod field_msg {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(sint64, tag = "1")]
        Int(i64),
        #[prost(double, tag = "2")]
        Double(f64),
        #[prost(string, tag = "3")]
        Text(String),
    }
}

impl From<&Field> for FieldMsg {
    fn from(f: &Field) -> Self {
        let value = match f {
            Field::Int(v) => field_msg::Value::Int(*v),
            Field::Double(v) => field_msg::Value::Double(*v),
            Field::Text(s) => field_msg::Value::Text(s.clone()),
        };
        FieldMsg { value: Some(value) }
    }
}

/// Serialise `fields` into an exactly-sized byte vector.
pub(crate) fn encode_record(fields: &[Field]) -> Vec<u8> {
    let msg = RecordMsg {
        fields: fields.iter().map(FieldMsg::from).collect(),
    };
    msg.encode_to_vec()
}

pub(crate) fn decode_record(kind: Kind, bytes: &[u8]) -> Result<Vec<Field>, ProtocolViolation> {
    let msg = RecordMsg::decode(bytes).map_err(|e| ProtocolViolation::Malformed {
        kind,
        reason: e.to_string(),
    })?;
    msg.fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| match f.value {
            Some(field_msg::Value::Int(v)) => Ok(Field::Int(v)),
            Some(field_msg::Value::Double(v)) => Ok(Field::Double(v)),
            Some(field_msg::Value::Text(s)) => Ok(Field::Text(s)),
            None => Err(ProtocolViolation::Malformed {
                kind,
                reason: format!("record field {i} has no value"),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_preserves_field_order() {
        let fields = vec![
            Field::Text("Amplitude".into()),
            Field::Int(-3),
            Field::Double(2.5),
        ];
        let bytes = encode_record(&fields);
        assert_eq!(bytes.len(), RecordMsg { fields: fields.iter().map(FieldMsg::from).collect() }.encoded_len());
        assert_eq!(decode_record(Kind::SliderCreate, &bytes).unwrap(), fields);
    }

    #[test]
    fn empty_record_is_zero_bytes() {
        assert!(encode_record(&[]).is_empty());
        assert_eq!(decode_record(Kind::ShowChoices, &[]).unwrap(), vec![]);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode_record(Kind::ButtonCreate, &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed { kind: Kind::ButtonCreate, .. }));
    }

    #[test]
    fn empty_field_is_malformed() {
        let bytes = RecordMsg {
            fields: vec![FieldMsg { value: None }],
        }
        .encode_to_vec();
        assert!(decode_record(Kind::ObjectLabel, &bytes).is_err());
    }
}

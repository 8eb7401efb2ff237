// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Logical arguments and results of notifications and calls.

use crate::buffer::BufferHandle;
use crate::kind::Shape;

/// One field of a structured record argument, e.g. a widget's position,
/// label and range.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Double(f64),
    Text(String),
}

impl Field {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Field::Double(v) => Some(*v),
            Field::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Double(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Text(v)
    }
}

/// A typed value as handed to or returned by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// At most four strings.
    Strings(Vec<String>),
    Record(Vec<Field>),
    /// A published measurement buffer.
    Bulk(BufferHandle),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::None => Shape::None,
            Value::Int(_) => Shape::Int,
            Value::Long(_) => Shape::Long,
            Value::Float(_) => Shape::Float,
            Value::Double(_) => Shape::Double,
            Value::Strings(_) => Shape::Strings,
            Value::Record(_) => Shape::Record,
            Value::Bulk(_) => Shape::Bulk,
        }
    }

    /// A single-string value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Strings(vec![s.into()])
    }

    pub fn record<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Value::Record(fields.into_iter().map(Into::into).collect())
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Value::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[Field]> {
        match self {
            Value::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bulk(&self) -> Option<BufferHandle> {
        match self {
            Value::Bulk(h) => Some(*h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_builder_converts_fields() {
        let v = Value::record([Field::from("gain"), Field::from(0.5), Field::from(3i64)]);
        let fields = v.as_record().unwrap();
        assert_eq!(fields[0].as_text(), Some("gain"));
        assert_eq!(fields[1].as_double(), Some(0.5));
        assert_eq!(fields[2].as_int(), Some(3));
        assert_eq!(v.shape(), Shape::Record);
    }

    #[test]
    fn widening_accessors() {
        assert_eq!(Value::Int(7).as_long(), Some(7));
        assert_eq!(Value::Float(0.25).as_double(), Some(0.25));
        assert_eq!(Value::text("x").as_int(), None);
    }
}

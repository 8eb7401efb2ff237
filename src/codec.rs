// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Value <-> Envelope.
//
// Scalars travel inline. Strings and records go into one exactly-sized
// message buffer whose lengths are carried inline, so the reader can check
// the buffer against what the envelope declares. The decoder is the final
// reader of message buffers and releases them; bulk handles pass through.

use tracing::warn;

use crate::buffer::{BufferArena, BufferHandle, BufferTag};
use crate::envelope::{check_shape, Envelope, Payload, StrLens, MAX_STRINGS};
use crate::error::{ProtocolViolation, Result};
use crate::kind::Kind;
use crate::queue::Wait;
use crate::record;
use crate::value::Value;

/// Build the envelope for `value`, allocating a message buffer if needed.
///
/// Fails with `TableExhausted` when every shared buffer is in use.
pub fn encode(arena: &BufferArena, kind: Kind, seq: u32, value: &Value) -> Result<Envelope> {
    encode_with(arena, kind, seq, value, None)
}

/// [`encode`], waiting for a free shared buffer under `wait` instead of
/// failing on a full table.
pub(crate) fn encode_waiting(
    arena: &BufferArena,
    kind: Kind,
    seq: u32,
    value: &Value,
    wait: &Wait<'_>,
) -> Result<Envelope> {
    encode_with(arena, kind, seq, value, Some(wait))
}

fn encode_with(
    arena: &BufferArena,
    kind: Kind,
    seq: u32,
    value: &Value,
    wait: Option<&Wait<'_>>,
) -> Result<Envelope> {
    check_shape(kind, value.shape())?;
    let payload = match value {
        Value::None => Payload::None,
        Value::Int(v) => Payload::Int(*v),
        Value::Long(v) => Payload::Long(*v),
        Value::Float(v) => Payload::Float(*v),
        Value::Double(v) => Payload::Double(*v),
        Value::Strings(strings) => {
            if strings.len() > MAX_STRINGS {
                return Err(ProtocolViolation::TooManyStrings {
                    kind,
                    count: strings.len() as u32,
                }
                .into());
            }
            let mut lens = Vec::with_capacity(strings.len());
            for s in strings {
                lens.push(declared_len(kind, s.len())?);
            }
            let lens = StrLens::new(&lens).ok_or(ProtocolViolation::TooManyStrings {
                kind,
                count: strings.len() as u32,
            })?;
            let joined = strings.concat();
            let handle = store(arena, joined.as_bytes(), wait)?;
            Payload::Strings { handle, lens }
        }
        Value::Record(fields) => {
            let bytes = record::encode_record(fields);
            let len = declared_len(kind, bytes.len())?;
            let handle = store(arena, &bytes, wait)?;
            Payload::Bytes { handle, len }
        }
        Value::Bulk(handle) => Payload::Bulk(*handle),
    };
    Ok(Envelope::new(kind, seq, payload)?)
}

fn store(arena: &BufferArena, bytes: &[u8], wait: Option<&Wait<'_>>) -> Result<BufferHandle> {
    match wait {
        Some(wait) => arena.allocate_waiting(BufferTag::Message, bytes, wait),
        None => arena.allocate(BufferTag::Message, bytes),
    }
}

fn declared_len(kind: Kind, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        ProtocolViolation::Malformed {
            kind,
            reason: format!("{len} bytes do not fit a length marker"),
        }
        .into()
    })
}

/// Recover the value carried by `env`, releasing its message buffer.
pub fn decode(arena: &BufferArena, env: &Envelope) -> Result<Value> {
    check_shape(env.kind, env.payload.shape())?;
    let value = match env.payload {
        Payload::None => Value::None,
        Payload::Int(v) => Value::Int(v),
        Payload::Long(v) => Value::Long(v),
        Payload::Float(v) => Value::Float(v),
        Payload::Double(v) => Value::Double(v),
        Payload::Strings { handle, lens } => {
            let bytes = take_message(arena, env.kind, handle, lens.total())?;
            let mut strings = Vec::with_capacity(lens.as_slice().len());
            let mut at = 0usize;
            for &len in lens.as_slice() {
                let end = at + len as usize;
                let s = std::str::from_utf8(&bytes[at..end]).map_err(|e| {
                    ProtocolViolation::Malformed {
                        kind: env.kind,
                        reason: e.to_string(),
                    }
                })?;
                strings.push(s.to_string());
                at = end;
            }
            Value::Strings(strings)
        }
        Payload::Bytes { handle, len } => {
            let bytes = take_message(arena, env.kind, handle, len as u64)?;
            Value::Record(record::decode_record(env.kind, &bytes)?)
        }
        Payload::Bulk(handle) => Value::Bulk(handle),
    };
    Ok(value)
}

/// Read and release a message buffer, checking its length.
fn take_message(
    arena: &BufferArena,
    kind: Kind,
    handle: BufferHandle,
    declared: u64,
) -> Result<Vec<u8>> {
    let bytes = arena.read_tagged(handle, BufferTag::Message)?;
    if let Err(e) = arena.release(handle) {
        warn!(%handle, %kind, error = %e, "could not release message buffer");
    }
    if bytes.len() as u64 != declared {
        return Err(ProtocolViolation::LengthMismatch {
            kind,
            declared,
            actual: bytes.len() as u64,
        }
        .into());
    }
    Ok(bytes)
}

/// Release the message buffer of an envelope that will never be decoded.
pub(crate) fn discard(arena: &BufferArena, env: &Envelope) {
    match env.payload {
        Payload::Strings { handle, .. } | Payload::Bytes { handle, .. } => {
            if let Err(e) = arena.release(handle) {
                warn!(%handle, kind = %env.kind, error = %e, "could not discard message buffer");
            }
        }
        _ => {}
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Envelopes: the unit of transfer through the channel queue.
//
// `Slot` is the fixed-size form stored in shared memory. `Payload` is the
// tagged view callers work with; the untagged slot word is never exposed.

use crate::buffer::BufferHandle;
use crate::error::ProtocolViolation;
use crate::kind::{Kind, Shape};

/// Maximum number of strings carried by one envelope.
pub const MAX_STRINGS: usize = 4;

const TAG_NONE: u32 = 0;
const TAG_INT: u32 = 1;
const TAG_LONG: u32 = 2;
const TAG_FLOAT: u32 = 3;
const TAG_DOUBLE: u32 = 4;
const TAG_BYTES: u32 = 5;
const TAG_STRINGS: u32 = 6;
const TAG_BULK: u32 = 7;

/// A queue slot as laid out in shared memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub kind: u32,
    pub tag: u32,
    pub seq: u32,
    /// String count for `TAG_STRINGS`.
    pub count: u32,
    /// Scalar bits or buffer handle.
    pub word: u64,
    /// String lengths (`TAG_STRINGS`) or byte length in `lens[0]` (`TAG_BYTES`).
    pub lens: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<Slot>() == 40);

impl Slot {
    /// The shared buffer this slot references, if any.
    pub fn handle(&self) -> Option<BufferHandle> {
        match self.tag {
            TAG_BYTES | TAG_STRINGS | TAG_BULK => Some(BufferHandle::from_raw(self.word)),
            _ => None,
        }
    }
}

/// Inline string lengths: up to [`MAX_STRINGS`] markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrLens {
    lens: [u32; 4],
    count: u8,
}

impl StrLens {
    /// Returns `None` for more than [`MAX_STRINGS`] entries.
    pub fn new(lens: &[u32]) -> Option<Self> {
        if lens.len() > MAX_STRINGS {
            return None;
        }
        let mut out = [0u32; 4];
        out[..lens.len()].copy_from_slice(lens);
        Some(Self {
            lens: out,
            count: lens.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.lens[..self.count as usize]
    }

    /// Sum of all lengths: the exact size of the backing buffer.
    pub fn total(&self) -> u64 {
        self.as_slice().iter().map(|&l| l as u64).sum()
    }
}

/// Tagged inline payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Byte-length marker plus the buffer holding those bytes.
    Bytes { handle: BufferHandle, len: u32 },
    /// String-length markers plus the buffer holding the concatenated strings.
    Strings { handle: BufferHandle, lens: StrLens },
    /// A published measurement buffer.
    Bulk(BufferHandle),
}

impl Payload {
    pub fn handle(&self) -> Option<BufferHandle> {
        match *self {
            Payload::Bytes { handle, .. }
            | Payload::Strings { handle, .. }
            | Payload::Bulk(handle) => Some(handle),
            _ => None,
        }
    }

    /// The kind shape this payload satisfies.
    pub fn shape(&self) -> Shape {
        match self {
            Payload::None => Shape::None,
            Payload::Int(_) => Shape::Int,
            Payload::Long(_) => Shape::Long,
            Payload::Float(_) => Shape::Float,
            Payload::Double(_) => Shape::Double,
            Payload::Bytes { .. } => Shape::Record,
            Payload::Strings { .. } => Shape::Strings,
            Payload::Bulk(_) => Shape::Bulk,
        }
    }
}

/// One unit of communication: kind, call sequence number, payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub kind: Kind,
    /// Sequence number of the call this envelope belongs to; 0 for notifications.
    pub seq: u32,
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope, checking the payload against the kind's shape.
    pub fn new(kind: Kind, seq: u32, payload: Payload) -> Result<Self, ProtocolViolation> {
        check_shape(kind, payload.shape())?;
        Ok(Self { kind, seq, payload })
    }

    pub fn to_slot(&self) -> Slot {
        let mut slot = Slot {
            kind: self.kind.code(),
            seq: self.seq,
            ..Slot::default()
        };
        match self.payload {
            Payload::None => slot.tag = TAG_NONE,
            Payload::Int(v) => {
                slot.tag = TAG_INT;
                slot.word = v as u32 as u64;
            }
            Payload::Long(v) => {
                slot.tag = TAG_LONG;
                slot.word = v as u64;
            }
            Payload::Float(v) => {
                slot.tag = TAG_FLOAT;
                slot.word = v.to_bits() as u64;
            }
            Payload::Double(v) => {
                slot.tag = TAG_DOUBLE;
                slot.word = v.to_bits();
            }
            Payload::Bytes { handle, len } => {
                slot.tag = TAG_BYTES;
                slot.word = handle.raw();
                slot.lens[0] = len;
            }
            Payload::Strings { handle, lens } => {
                slot.tag = TAG_STRINGS;
                slot.word = handle.raw();
                slot.count = lens.count as u32;
                slot.lens = lens.lens;
            }
            Payload::Bulk(handle) => {
                slot.tag = TAG_BULK;
                slot.word = handle.raw();
            }
        }
        slot
    }

    /// Decode a slot. Unknown kinds or tags, and payloads that do not match
    /// the kind's shape, are protocol violations.
    pub fn from_slot(slot: &Slot) -> Result<Self, ProtocolViolation> {
        let kind = Kind::from_code(slot.kind).ok_or(ProtocolViolation::UnknownKind(slot.kind))?;
        let payload = match slot.tag {
            TAG_NONE => Payload::None,
            TAG_INT => Payload::Int(slot.word as u32 as i32),
            TAG_LONG => Payload::Long(slot.word as i64),
            TAG_FLOAT => Payload::Float(f32::from_bits(slot.word as u32)),
            TAG_DOUBLE => Payload::Double(f64::from_bits(slot.word)),
            TAG_BYTES => Payload::Bytes {
                handle: BufferHandle::from_raw(slot.word),
                len: slot.lens[0],
            },
            TAG_STRINGS => {
                if slot.count as usize > MAX_STRINGS {
                    return Err(ProtocolViolation::TooManyStrings {
                        kind,
                        count: slot.count,
                    });
                }
                let lens = StrLens {
                    lens: slot.lens,
                    count: slot.count as u8,
                };
                Payload::Strings {
                    handle: BufferHandle::from_raw(slot.word),
                    lens,
                }
            }
            TAG_BULK => Payload::Bulk(BufferHandle::from_raw(slot.word)),
            tag => return Err(ProtocolViolation::UnknownTag { kind, tag }),
        };
        Envelope::new(kind, slot.seq, payload)
    }
}

pub(crate) fn check_shape(kind: Kind, found: Shape) -> Result<(), ProtocolViolation> {
    let expected = kind.shape();
    if expected != found {
        return Err(ProtocolViolation::ShapeMismatch {
            kind,
            expected: expected.name(),
            found: found.name(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_payloads_survive_the_slot() {
        let env = Envelope::new(Kind::Layout, 3, Payload::Int(-5)).unwrap();
        assert_eq!(Envelope::from_slot(&env.to_slot()).unwrap(), env);

        let env = Envelope::new(Kind::Progress, 0, Payload::Float(0.5)).unwrap();
        assert_eq!(Envelope::from_slot(&env.to_slot()).unwrap(), env);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = Envelope::new(Kind::SliderState, 1, Payload::Int(7)).unwrap_err();
        assert!(matches!(err, ProtocolViolation::ShapeMismatch { .. }));
    }

    #[test]
    fn slot_with_wrong_tag_is_rejected() {
        let slot = Slot {
            kind: Kind::ButtonDelete.code(),
            tag: TAG_DOUBLE,
            ..Slot::default()
        };
        assert!(matches!(
            Envelope::from_slot(&slot),
            Err(ProtocolViolation::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_kind_and_tag_are_rejected() {
        let slot = Slot {
            kind: 9999,
            ..Slot::default()
        };
        assert_eq!(
            Envelope::from_slot(&slot),
            Err(ProtocolViolation::UnknownKind(9999))
        );

        let slot = Slot {
            kind: Kind::Ack.code(),
            tag: 42,
            ..Slot::default()
        };
        assert!(matches!(
            Envelope::from_slot(&slot),
            Err(ProtocolViolation::UnknownTag { tag: 42, .. })
        ));
    }

    #[test]
    fn too_many_strings_is_rejected() {
        let slot = Slot {
            kind: Kind::Print.code(),
            tag: TAG_STRINGS,
            count: 5,
            ..Slot::default()
        };
        assert!(matches!(
            Envelope::from_slot(&slot),
            Err(ProtocolViolation::TooManyStrings { count: 5, .. })
        ));
        assert!(StrLens::new(&[1, 2, 3, 4, 5]).is_none());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bulk transfer of measurement arrays.
//
// Segment layout:
//
//   [ rows: u64 LE ][ cols: u64 LE ][ rows * cols f64 LE, row-major ]
//
// One-dimensional data is stored with rows = 1. The producer publishes and
// hands the handle over in a DISPLAY_DATA notification; the consumer reads
// and then either releases the buffer or parks it with `request_more` so the
// next publish that fits reuses the segment.

use tracing::debug;

use crate::buffer::{BufferArena, BufferHandle, BufferTag};
use crate::error::{BulkMisuse, Result};

const HEADER: usize = 16;

/// Classification of a bulk buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    OneDimensional,
    TwoDimensional,
    /// Parked by the consumer, waiting for more data.
    MoreRequested,
}

/// A measurement array.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkData {
    OneD(Vec<f64>),
    TwoD {
        rows: usize,
        cols: usize,
        /// Row-major.
        values: Vec<f64>,
    },
}

impl BulkData {
    /// Build a 2-D array, checking that `values` holds `rows * cols` items.
    pub fn two_d(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(BulkMisuse::BadDimensions {
                rows: rows as u64,
                cols: cols as u64,
                len: values.len(),
            }
            .into());
        }
        Ok(BulkData::TwoD { rows, cols, values })
    }

    pub fn kind(&self) -> BulkKind {
        match self {
            BulkData::OneD(_) => BulkKind::OneDimensional,
            BulkData::TwoD { .. } => BulkKind::TwoDimensional,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            BulkData::OneD(_) => 1,
            BulkData::TwoD { rows, .. } => *rows,
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            BulkData::OneD(v) => v.len(),
            BulkData::TwoD { cols, .. } => *cols,
        }
    }

    pub fn values(&self) -> &[f64] {
        match self {
            BulkData::OneD(v) => v,
            BulkData::TwoD { values, .. } => values,
        }
    }

    /// Element at (`row`, `col`).
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        self.values().get(row * self.cols() + col).copied()
    }

    fn tag(&self) -> BufferTag {
        match self {
            BulkData::OneD(_) => BufferTag::OneDimensional,
            BulkData::TwoD { .. } => BufferTag::TwoDimensional,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let (rows, cols) = (self.rows(), self.cols());
        if rows.checked_mul(cols) != Some(self.values().len()) {
            return Err(BulkMisuse::BadDimensions {
                rows: rows as u64,
                cols: cols as u64,
                len: self.values().len(),
            }
            .into());
        }
        let mut out = Vec::with_capacity(HEADER + self.values().len() * 8);
        out.extend_from_slice(&(rows as u64).to_le_bytes());
        out.extend_from_slice(&(cols as u64).to_le_bytes());
        for v in self.values() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        Ok(out)
    }

    fn from_bytes(tag: BufferTag, bytes: &[u8]) -> Result<Self> {
        let bad = |rows: u64, cols: u64| BulkMisuse::BadDimensions {
            rows,
            cols,
            len: bytes.len().saturating_sub(HEADER) / 8,
        };
        if bytes.len() < HEADER {
            return Err(bad(0, 0).into());
        }
        let word = |at: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[at..at + 8]);
            w
        };
        let rows = u64::from_le_bytes(word(0));
        let cols = u64::from_le_bytes(word(8));
        let count = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(8))
            .and_then(|n| n.checked_add(HEADER as u64));
        if count != Some(bytes.len() as u64) || (tag == BufferTag::OneDimensional && rows != 1) {
            return Err(bad(rows, cols).into());
        }
        let values: Vec<f64> = bytes[HEADER..]
            .chunks_exact(8)
            .map(|c| {
                let mut w = [0u8; 8];
                w.copy_from_slice(c);
                f64::from_le_bytes(w)
            })
            .collect();
        Ok(match tag {
            BufferTag::OneDimensional => BulkData::OneD(values),
            _ => BulkData::TwoD {
                rows: rows as usize,
                cols: cols as usize,
                values,
            },
        })
    }
}

/// Publishes and consumes bulk buffers on either side of a channel.
#[derive(Clone)]
pub struct BulkTransfer {
    arena: BufferArena,
}

impl BulkTransfer {
    pub(crate) fn new(arena: BufferArena) -> Self {
        Self { arena }
    }

    /// Copy `data` into a shared buffer and publish it.
    pub fn publish(&self, data: &BulkData) -> Result<BufferHandle> {
        let bytes = data.to_bytes()?;
        let handle = self.arena.allocate(data.tag(), &bytes)?;
        debug!(
            %handle,
            rows = data.rows(),
            cols = data.cols(),
            "bulk data published"
        );
        Ok(handle)
    }

    pub fn publish_1d(&self, values: &[f64]) -> Result<BufferHandle> {
        self.publish(&BulkData::OneD(values.to_vec()))
    }

    pub fn publish_2d(&self, rows: usize, cols: usize, values: &[f64]) -> Result<BufferHandle> {
        self.publish(&BulkData::two_d(rows, cols, values.to_vec())?)
    }

    /// Copy out a published array. The buffer stays live.
    pub fn read(&self, handle: BufferHandle) -> Result<BulkData> {
        let (tag, bytes) = self.arena.read(handle)?;
        match tag {
            BufferTag::OneDimensional | BufferTag::TwoDimensional => {
                BulkData::from_bytes(tag, &bytes)
            }
            other => Err(BulkMisuse::WrongTag {
                handle,
                expected: "bulk data",
                found: other.name(),
            }
            .into()),
        }
    }

    /// Read and release: the caller is the final reader.
    pub fn consume(&self, handle: BufferHandle) -> Result<BulkData> {
        let data = self.read(handle)?;
        self.arena.release(handle)?;
        Ok(data)
    }

    /// Park the buffer for reuse by the producer's next publish that fits.
    pub fn request_more(&self, handle: BufferHandle) -> Result<()> {
        self.kind(handle)?;
        self.arena.park(handle)
    }

    /// Free the buffer. Fails while a queued envelope still names it.
    pub fn release(&self, handle: BufferHandle) -> Result<()> {
        self.arena.release(handle)
    }

    pub fn kind(&self, handle: BufferHandle) -> Result<BulkKind> {
        match self.arena.tag(handle)? {
            BufferTag::OneDimensional => Ok(BulkKind::OneDimensional),
            BufferTag::TwoDimensional => Ok(BulkKind::TwoDimensional),
            BufferTag::MoreRequested => Ok(BulkKind::MoreRequested),
            BufferTag::Message => Err(BulkMisuse::WrongTag {
                handle,
                expected: "bulk data",
                found: BufferTag::Message.name(),
            }
            .into()),
        }
    }

    /// Number of shared buffers currently allocated on this channel.
    pub fn live(&self) -> Result<usize> {
        self.arena.live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_d_layout_is_row_major() {
        let data = BulkData::two_d(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let bytes = data.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER + 6 * 8);
        assert_eq!(&bytes[0..8], &2u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &3u64.to_le_bytes());
        // (1, 0) is the fourth value
        assert_eq!(&bytes[HEADER + 3 * 8..HEADER + 4 * 8], &4.0f64.to_le_bytes());
        assert_eq!(data.get(1, 0), Some(4.0));
        assert_eq!(data.get(2, 0), None);
        assert_eq!(
            BulkData::from_bytes(BufferTag::TwoDimensional, &bytes).unwrap(),
            data
        );
    }

    #[test]
    fn one_d_is_a_single_row() {
        let data = BulkData::OneD(vec![0.5; 4]);
        assert_eq!((data.rows(), data.cols()), (1, 4));
        let bytes = data.to_bytes().unwrap();
        assert_eq!(
            BulkData::from_bytes(BufferTag::OneDimensional, &bytes).unwrap(),
            data
        );
    }

    #[test]
    fn empty_array_has_only_a_header() {
        let data = BulkData::OneD(Vec::new());
        assert_eq!(data.to_bytes().unwrap().len(), HEADER);
    }

    #[test]
    fn bad_dimensions_are_rejected() {
        assert!(BulkData::two_d(2, 2, vec![0.0; 3]).is_err());
        assert!(BulkData::two_d(usize::MAX, 2, vec![]).is_err());

        let mut bytes = BulkData::OneD(vec![1.0, 2.0]).to_bytes().unwrap();
        bytes.truncate(HEADER + 8);
        assert!(BulkData::from_bytes(BufferTag::OneDimensional, &bytes).is_err());
        assert!(BulkData::from_bytes(BufferTag::TwoDimensional, &[0u8; 3]).is_err());
    }
}

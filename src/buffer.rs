// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared buffers: variable-length content moved out of band.
//
// Each buffer is its own shm segment. Its bookkeeping lives in a fixed table
// inside the channel segment so both processes agree on ownership:
//
//   Free ──allocate──► Filling ──publish──► Published ──release──► Free
//                                              │  ▲
//                                   request_more  │ publish (fits)
//                                              ▼  │
//                                             Parked
//
// `refs` counts queued envelopes (and the reply mailbox) naming the buffer.
// A buffer with `refs > 0` cannot be released or parked.

use std::fmt;
use std::sync::Arc;

use strum::{Display, FromRepr, IntoStaticStr};
use tracing::{debug, trace};

use crate::error::{BulkMisuse, Result};
use crate::queue::{Cond, QueueGuard, SharedQueue, Wait};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::shm_name;

/// Names one shared buffer: `(generation << 32) | index`.
///
/// Generations start at 1, so the all-zero handle never names a buffer and
/// a handle kept past its buffer's release is detected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 as u32
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index(), self.generation())
    }
}

/// What a shared buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[repr(u32)]
pub enum BufferTag {
    /// Strings or record bytes of one envelope.
    Message = 1,
    OneDimensional = 2,
    TwoDimensional = 3,
    /// Parked by the consumer for reuse by the next publish.
    MoreRequested = 4,
}

impl BufferTag {
    fn from_raw(raw: u32) -> Option<Self> {
        Self::from_repr(raw)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum EntryState {
    Free,
    Filling,
    Published,
    Parked,
}

impl EntryState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => EntryState::Filling,
            2 => EntryState::Published,
            3 => EntryState::Parked,
            _ => EntryState::Free,
        }
    }

    fn raw(self) -> u32 {
        match self {
            EntryState::Free => 0,
            EntryState::Filling => 1,
            EntryState::Published => 2,
            EntryState::Parked => 3,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// One row of the buffer table in the channel segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BufferEntry {
    state: u32,
    tag: u32,
    pub(crate) generation: u32,
    pub(crate) refs: u32,
    serial: u32,
    _pad: u32,
    len: u64,
    /// Size of the backing segment; at least 1.
    capacity: u64,
}

impl BufferEntry {
    pub fn state(&self) -> EntryState {
        EntryState::from_raw(self.state)
    }

    fn set_state(&mut self, state: EntryState) {
        self.state = state.raw();
    }

    fn tag(&self) -> Option<BufferTag> {
        BufferTag::from_raw(self.tag)
    }

    fn tag_name(&self) -> &'static str {
        self.tag().map_or("unknown", BufferTag::name)
    }
}

/// Process-local view of the shared buffer table.
#[derive(Clone)]
pub struct BufferArena {
    queue: Arc<SharedQueue>,
    prefix: String,
    name: String,
}

impl BufferArena {
    pub(crate) fn new(queue: Arc<SharedQueue>, prefix: &str, name: &str) -> Self {
        Self {
            queue,
            prefix: prefix.to_string(),
            name: name.to_string(),
        }
    }

    fn segment_name(&self, index: u32, serial: u32) -> String {
        shm_name::buffer_segment(&self.prefix, &self.name, index, serial)
    }

    /// Allocate a buffer holding exactly `data`, and publish it.
    ///
    /// Array tags first look for a parked buffer large enough and reuse its
    /// segment. When the table is full a parked buffer is recycled; with
    /// nothing to recycle this fails with `TableExhausted`.
    pub fn allocate(&self, tag: BufferTag, data: &[u8]) -> Result<BufferHandle> {
        self.allocate_with(tag, data, None)
    }

    /// [`allocate`](Self::allocate), but sleep while every entry is taken.
    /// Entries come back as the consumer decodes queued envelopes.
    pub(crate) fn allocate_waiting(
        &self,
        tag: BufferTag,
        data: &[u8],
        wait: &Wait<'_>,
    ) -> Result<BufferHandle> {
        self.allocate_with(tag, data, Some(wait))
    }

    fn allocate_with(
        &self,
        tag: BufferTag,
        data: &[u8],
        wait: Option<&Wait<'_>>,
    ) -> Result<BufferHandle> {
        let len = data.len() as u64;
        let (handle, segment, reuse, evicted) = {
            let mut guard = self.queue.lock()?;
            if let Some(wait) = wait {
                if !guard.block_on(Cond::BufferFree, wait, |g| !has_room(g.entries()))? {
                    return Err(wait.expired());
                }
            }
            let slots = guard.entries().len() as u32;

            let parked_fit = if tag == BufferTag::Message {
                None
            } else {
                guard
                    .entries()
                    .iter()
                    .position(|e| e.state() == EntryState::Parked && e.capacity >= len.max(1))
            };
            let (index, reuse) = match parked_fit {
                Some(i) => (i, true),
                None => {
                    let free = guard
                        .entries()
                        .iter()
                        .position(|e| e.state() == EntryState::Free);
                    let any_parked = guard
                        .entries()
                        .iter()
                        .position(|e| e.state() == EntryState::Parked);
                    let index = free
                        .or(any_parked)
                        .ok_or(BulkMisuse::TableExhausted(slots))?;
                    (index, false)
                }
            };

            let evicted = {
                let e = &guard.entries()[index];
                (e.state() == EntryState::Parked && !reuse).then_some(e.serial)
            };
            let serial = if reuse {
                guard.entries()[index].serial
            } else {
                next_serial(&mut guard)
            };

            let entry = &mut guard.entries()[index];
            entry.generation = entry.generation.wrapping_add(1).max(1);
            entry.set_state(EntryState::Filling);
            entry.tag = tag as u32;
            entry.refs = 0;
            entry.serial = serial;
            entry.len = len;
            if !reuse {
                entry.capacity = len.max(1);
            }
            let handle = BufferHandle::new(index as u32, entry.generation);
            let capacity = entry.capacity;
            (
                handle,
                (self.segment_name(index as u32, serial), capacity),
                reuse,
                evicted,
            )
        };

        if let Some(old_serial) = evicted {
            ShmHandle::unlink_by_name(&self.segment_name(handle.index(), old_serial));
        }

        let (segment_name, capacity) = segment;
        if let Err(e) = write_segment(&segment_name, capacity as usize, data, reuse) {
            self.abandon(handle, &segment_name);
            return Err(e.into());
        }

        {
            let mut guard = self.queue.lock()?;
            let entry = guard.entry(handle)?;
            entry.set_state(EntryState::Published);
        }
        trace!(%handle, tag = tag.name(), len, reuse, "buffer published");
        Ok(handle)
    }

    fn abandon(&self, handle: BufferHandle, segment: &str) {
        if let Ok(mut guard) = self.queue.lock() {
            if let Ok(entry) = guard.entry(handle) {
                entry.set_state(EntryState::Free);
                entry.refs = 0;
            }
            guard.signal(Cond::BufferFree);
        }
        ShmHandle::unlink_by_name(segment);
    }

    /// Copy out the contents of a published buffer without releasing it.
    pub fn read(&self, handle: BufferHandle) -> Result<(BufferTag, Vec<u8>)> {
        let (tag, len, capacity, serial) = {
            let mut guard = self.queue.lock()?;
            let entry = guard.entry(handle)?;
            if entry.state() != EntryState::Published {
                return Err(BulkMisuse::NotPublished {
                    handle,
                    state: entry.state().name(),
                }
                .into());
            }
            let tag = entry.tag().ok_or(BulkMisuse::WrongTag {
                handle,
                expected: "a known tag",
                found: "unknown",
            })?;
            (tag, entry.len, entry.capacity, entry.serial)
        };
        let shm = ShmHandle::acquire(
            &self.segment_name(handle.index(), serial),
            capacity as usize,
            ShmOpenMode::Open,
        )?;
        Ok((tag, shm.bytes(len as usize)?.to_vec()))
    }

    /// [`read`](Self::read), insisting on `expected`.
    pub fn read_tagged(&self, handle: BufferHandle, expected: BufferTag) -> Result<Vec<u8>> {
        let (tag, bytes) = self.read(handle)?;
        if tag != expected {
            return Err(BulkMisuse::WrongTag {
                handle,
                expected: expected.name(),
                found: tag.name(),
            }
            .into());
        }
        Ok(bytes)
    }

    /// Free a buffer and unlink its segment.
    pub fn release(&self, handle: BufferHandle) -> Result<()> {
        let segment = {
            let mut guard = self.queue.lock()?;
            let entry = guard.entry(handle)?;
            match entry.state() {
                EntryState::Published | EntryState::Parked => {}
                state => {
                    return Err(BulkMisuse::NotPublished {
                        handle,
                        state: state.name(),
                    }
                    .into())
                }
            }
            if entry.refs > 0 {
                return Err(BulkMisuse::StillReferenced {
                    handle,
                    refs: entry.refs,
                }
                .into());
            }
            entry.set_state(EntryState::Free);
            let segment = self.segment_name(handle.index(), entry.serial);
            guard.signal(Cond::BufferFree);
            segment
        };
        ShmHandle::unlink_by_name(&segment);
        trace!(%handle, "buffer released");
        Ok(())
    }

    /// Keep a buffer's segment for the next publish that fits.
    pub fn park(&self, handle: BufferHandle) -> Result<()> {
        let mut guard = self.queue.lock()?;
        let entry = guard.entry(handle)?;
        if entry.state() != EntryState::Published {
            return Err(BulkMisuse::NotPublished {
                handle,
                state: entry.state().name(),
            }
            .into());
        }
        if entry.refs > 0 {
            return Err(BulkMisuse::StillReferenced {
                handle,
                refs: entry.refs,
            }
            .into());
        }
        entry.set_state(EntryState::Parked);
        entry.tag = BufferTag::MoreRequested as u32;
        debug!(%handle, capacity = entry.capacity, "buffer parked for reuse");
        guard.signal(Cond::BufferFree);
        Ok(())
    }

    /// Tag of a live buffer.
    pub fn tag(&self, handle: BufferHandle) -> Result<BufferTag> {
        let mut guard = self.queue.lock()?;
        let entry = guard.entry(handle)?;
        entry.tag().ok_or_else(|| {
            BulkMisuse::WrongTag {
                handle,
                expected: "a known tag",
                found: entry.tag_name(),
            }
            .into()
        })
    }

    /// Payload length of a live buffer in bytes.
    pub fn len(&self, handle: BufferHandle) -> Result<u64> {
        let mut guard = self.queue.lock()?;
        Ok(guard.entry(handle)?.len)
    }

    /// Number of table entries not free.
    pub fn live(&self) -> Result<usize> {
        let mut guard = self.queue.lock()?;
        Ok(guard
            .entries()
            .iter()
            .filter(|e| e.state() != EntryState::Free)
            .count())
    }

    /// Free every buffer regardless of state. Used by teardown.
    pub(crate) fn release_all(&self) -> Result<usize> {
        let segments: Vec<String> = {
            let mut guard = self.queue.lock()?;
            guard
                .entries()
                .iter_mut()
                .enumerate()
                .filter(|(_, e)| e.state() != EntryState::Free)
                .map(|(i, e)| {
                    e.set_state(EntryState::Free);
                    e.refs = 0;
                    self.segment_name(i as u32, e.serial)
                })
                .collect()
        };
        for name in &segments {
            ShmHandle::unlink_by_name(name);
        }
        Ok(segments.len())
    }
}

/// Whether `allocate` can find an entry without failing.
fn has_room(entries: &[BufferEntry]) -> bool {
    entries
        .iter()
        .any(|e| matches!(e.state(), EntryState::Free | EntryState::Parked))
}

fn next_serial(guard: &mut QueueGuard<'_>) -> u32 {
    let st = guard.state();
    let serial = st.next_serial;
    st.next_serial = st.next_serial.wrapping_add(1).max(1);
    serial
}

fn write_segment(name: &str, capacity: usize, data: &[u8], reuse: bool) -> std::io::Result<()> {
    let shm = if reuse {
        ShmHandle::acquire(name, capacity, ShmOpenMode::Open)?
    } else {
        // A crashed earlier run may have left a segment with this name.
        ShmHandle::unlink_by_name(name);
        ShmHandle::acquire(name, capacity, ShmOpenMode::Create)?
    };
    shm.write(data)
}

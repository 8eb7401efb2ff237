// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared channel state: one shared memory segment holding the envelope
// queue, the reply mailbox and the shared-buffer table, all guarded by a
// single process-shared mutex.
//
// Segment layout:
//
//   [ SyncBlock  ]  pthread mutex + not_empty / not_full / reply_ready /
//                   buffer_free conds
//   [ QueueState ]  indices, count, role flags, reply mailbox
//   [ Slot       ] × capacity
//   [ BufferEntry] × buffer_slots
//
// The queue keeps an explicit `count`, so all `capacity` slots are usable:
// empty iff count == 0, full iff count == capacity. `low` is only advanced
// by the consumer, `high` only by the producer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::buffer::{BufferEntry, BufferHandle, EntryState};
use crate::envelope::Slot;
use crate::error::{BulkMisuse, ChannelError, PeerLoss, ProtocolViolation, Result, Role};
use crate::platform::{current_pid, process_alive, RawCond, RawMutex};
use crate::shm::{ShmHandle, ShmOpenMode};

/// "LBQ1": marks an initialised channel segment.
pub(crate) const MAGIC: u32 = 0x4c42_5131;
pub(crate) const LAYOUT_VERSION: u32 = 2;

const PRODUCER_ATTACHED: u32 = 1 << 0;
const CONSUMER_ATTACHED: u32 = 1 << 1;
const PRODUCER_LEFT: u32 = 1 << 2;
const CONSUMER_LEFT: u32 = 1 << 3;
const TORN_DOWN: u32 = 1 << 4;

#[repr(C)]
struct SyncBlock {
    lock: libc::pthread_mutex_t,
    not_empty: libc::pthread_cond_t,
    not_full: libc::pthread_cond_t,
    reply_ready: libc::pthread_cond_t,
    buffer_free: libc::pthread_cond_t,
}

#[repr(C)]
pub(crate) struct QueueState {
    magic: u32,
    version: u32,
    capacity: u32,
    buffer_slots: u32,
    low: u32,
    high: u32,
    count: u32,
    flags: u32,
    producer_pid: i32,
    consumer_pid: i32,
    /// Source of fresh buffer segment serials.
    pub(crate) next_serial: u32,
    reply_full: u32,
    reply: Slot,
}

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    capacity: u32,
    buffer_slots: u32,
    state_off: usize,
    slots_off: usize,
    table_off: usize,
    total: usize,
}

impl Layout {
    fn new(capacity: u32, buffer_slots: u32) -> Self {
        let state_off = align_up(std::mem::size_of::<SyncBlock>(), 8);
        let slots_off = align_up(
            state_off + std::mem::size_of::<QueueState>(),
            std::mem::align_of::<Slot>(),
        );
        let table_off = align_up(
            slots_off + capacity as usize * std::mem::size_of::<Slot>(),
            std::mem::align_of::<BufferEntry>(),
        );
        let total = table_off + buffer_slots as usize * std::mem::size_of::<BufferEntry>();
        Self {
            capacity,
            buffer_slots,
            state_off,
            slots_off,
            table_off,
            total,
        }
    }
}

/// Which condition variable to wait on or signal.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Cond {
    NotEmpty,
    NotFull,
    ReplyReady,
    /// A buffer table entry became free or parked.
    BufferFree,
}

/// How long and on whose behalf a blocking operation may wait.
pub(crate) struct Wait<'a> {
    /// The side whose disappearance ends the wait.
    pub peer: Role,
    pub abort: &'a AtomicBool,
    pub budget: Option<Duration>,
    pub deadline: Option<Instant>,
    /// Upper bound on one condvar sleep, so a crashed peer is noticed.
    pub probe: Duration,
}

impl<'a> Wait<'a> {
    pub fn new(peer: Role, abort: &'a AtomicBool, budget: Option<Duration>, probe: Duration) -> Self {
        Self {
            peer,
            abort,
            budget,
            deadline: budget.map(|b| Instant::now() + b),
            probe,
        }
    }

    /// Next sleep duration, or `None` once the deadline has passed.
    fn slice(&self) -> Option<Duration> {
        match self.deadline {
            None => Some(self.probe),
            Some(dl) => {
                let left = dl.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    None
                } else {
                    Some(left.min(self.probe))
                }
            }
        }
    }

    pub(crate) fn expired(&self) -> ChannelError {
        ChannelError::PeerLost(PeerLoss::Unresponsive(self.budget.unwrap_or_default()))
    }
}

/// The mapped channel segment.
pub(crate) struct SharedQueue {
    shm: ShmHandle,
    layout: Layout,
    mutex: RawMutex,
    not_empty: RawCond,
    not_full: RawCond,
    reply_ready: RawCond,
    buffer_free: RawCond,
}

impl SharedQueue {
    /// Create a fresh segment, replacing any stale one of the same name.
    pub fn create(segment: &str, capacity: u32, buffer_slots: u32) -> Result<Self> {
        let layout = Layout::new(capacity, buffer_slots);
        ShmHandle::unlink_by_name(segment);
        let shm = ShmHandle::acquire(segment, layout.total, ShmOpenMode::Create)?;
        let queue = Self::bind(shm, layout);

        queue.mutex.init()?;
        queue.not_empty.init()?;
        queue.not_full.init()?;
        queue.reply_ready.init()?;
        queue.buffer_free.init()?;

        // Fresh shm is zero-filled; only the header needs values.
        let st = unsafe { &mut *queue.state_ptr() };
        st.version = LAYOUT_VERSION;
        st.capacity = capacity;
        st.buffer_slots = buffer_slots;
        st.next_serial = 1;
        std::sync::atomic::fence(Ordering::Release);
        st.magic = MAGIC;
        Ok(queue)
    }

    /// Map an existing segment created with the same geometry.
    pub fn open(segment: &str, capacity: u32, buffer_slots: u32) -> Result<Self> {
        let layout = Layout::new(capacity, buffer_slots);
        let shm = ShmHandle::acquire(segment, layout.total, ShmOpenMode::Open)?;
        let queue = Self::bind(shm, layout);

        let mut guard = queue.lock()?;
        let st = guard.state();
        if st.magic != MAGIC {
            return Err(ProtocolViolation::BadMagic(st.magic).into());
        }
        if st.version != LAYOUT_VERSION
            || st.capacity != capacity
            || st.buffer_slots != buffer_slots
        {
            return Err(ChannelError::Config(format!(
                "segment {segment} has capacity {} / {} buffer slots, configured {capacity} / {buffer_slots}",
                st.capacity, st.buffer_slots
            )));
        }
        if st.flags & TORN_DOWN != 0 {
            return Err(ChannelError::TornDown);
        }
        drop(guard);
        Ok(queue)
    }

    fn bind(shm: ShmHandle, layout: Layout) -> Self {
        let sync = shm.as_mut_ptr() as *mut SyncBlock;
        // Safety: the mapping is at least `layout.total` bytes and outlives
        // the raw handles, which are stored next to it.
        unsafe {
            Self {
                mutex: RawMutex::from_ptr(std::ptr::addr_of_mut!((*sync).lock)),
                not_empty: RawCond::from_ptr(std::ptr::addr_of_mut!((*sync).not_empty)),
                not_full: RawCond::from_ptr(std::ptr::addr_of_mut!((*sync).not_full)),
                reply_ready: RawCond::from_ptr(std::ptr::addr_of_mut!((*sync).reply_ready)),
                buffer_free: RawCond::from_ptr(std::ptr::addr_of_mut!((*sync).buffer_free)),
                shm,
                layout,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity as usize
    }

    pub fn buffer_slots(&self) -> u32 {
        self.layout.buffer_slots
    }

    pub fn segment(&self) -> &ShmHandle {
        &self.shm
    }

    fn state_ptr(&self) -> *mut QueueState {
        unsafe { self.shm.as_mut_ptr().add(self.layout.state_off) as *mut QueueState }
    }

    fn slots_ptr(&self) -> *mut Slot {
        unsafe { self.shm.as_mut_ptr().add(self.layout.slots_off) as *mut Slot }
    }

    fn table_ptr(&self) -> *mut BufferEntry {
        unsafe { self.shm.as_mut_ptr().add(self.layout.table_off) as *mut BufferEntry }
    }

    fn cond(&self, which: Cond) -> &RawCond {
        match which {
            Cond::NotEmpty => &self.not_empty,
            Cond::NotFull => &self.not_full,
            Cond::ReplyReady => &self.reply_ready,
            Cond::BufferFree => &self.buffer_free,
        }
    }

    /// Take the segment lock.
    pub fn lock(&self) -> Result<QueueGuard<'_>> {
        if self.mutex.lock()? {
            warn!("previous holder of the channel lock died; state recovered");
        }
        Ok(QueueGuard { queue: self })
    }

    // -----------------------------------------------------------------------
    // Queue operations
    // -----------------------------------------------------------------------

    /// Enqueue without blocking. `Ok(false)` when the queue is full.
    pub fn try_enqueue(&self, slot: &Slot) -> Result<bool> {
        let mut guard = guard_live(self.lock()?)?;
        if guard.is_full() {
            return Ok(false);
        }
        guard.push(slot)?;
        Ok(true)
    }

    /// Dequeue without blocking. `Ok(None)` when the queue is empty.
    pub fn try_dequeue(&self) -> Result<Option<Slot>> {
        let mut guard = self.lock()?;
        Ok(guard.pop())
    }

    /// Enqueue, blocking while the queue is full.
    pub fn enqueue(&self, slot: &Slot, wait: &Wait<'_>) -> Result<()> {
        let mut guard = self.lock()?;
        if !guard.block_while(Cond::NotFull, wait, |st| st.count >= st.capacity)? {
            return Err(wait.expired());
        }
        guard.push(slot)
    }

    /// Dequeue, blocking while the queue is empty. `Ok(None)` when the wait
    /// budget runs out.
    pub fn dequeue(&self, wait: &Wait<'_>) -> Result<Option<Slot>> {
        let mut guard = self.lock()?;
        if let Some(slot) = guard.pop() {
            return Ok(Some(slot));
        }
        if !guard.block_while(Cond::NotEmpty, wait, |st| st.count == 0)? {
            return Ok(None);
        }
        Ok(guard.pop())
    }

    /// Block until the queue is non-empty. `Ok(false)` on budget expiry.
    pub fn wait_not_empty(&self, wait: &Wait<'_>) -> Result<bool> {
        let mut guard = self.lock()?;
        if guard.state().count > 0 {
            return Ok(true);
        }
        guard.block_while(Cond::NotEmpty, wait, |st| st.count == 0)
    }

    pub fn len(&self) -> Result<usize> {
        let mut guard = self.lock()?;
        Ok(guard.state().count as usize)
    }

    // -----------------------------------------------------------------------
    // Reply mailbox
    // -----------------------------------------------------------------------

    /// Deposit a reply. Only one reply may be outstanding.
    pub fn post_reply(&self, slot: &Slot) -> Result<()> {
        let mut guard = guard_live(self.lock()?)?;
        if guard.state().reply_full != 0 {
            return Err(ProtocolViolation::ReplyOverrun.into());
        }
        if let Some(handle) = slot.handle() {
            guard.retain(handle)?;
        }
        let st = guard.state();
        st.reply = *slot;
        st.reply_full = 1;
        guard.signal(Cond::ReplyReady);
        Ok(())
    }

    /// Block until a reply is available and take it.
    pub fn await_reply(&self, wait: &Wait<'_>) -> Result<Slot> {
        let mut guard = self.lock()?;
        if !guard.block_while(Cond::ReplyReady, wait, |st| st.reply_full == 0)? {
            return Err(wait.expired());
        }
        Ok(guard.take_reply())
    }

    /// Take a reply if one is waiting.
    pub fn take_reply(&self) -> Result<Option<Slot>> {
        let mut guard = self.lock()?;
        if guard.state().reply_full == 0 {
            return Ok(None);
        }
        Ok(Some(guard.take_reply()))
    }

    // -----------------------------------------------------------------------
    // Roles and lifecycle
    // -----------------------------------------------------------------------

    pub fn attach(&self, role: Role) -> Result<()> {
        let mut guard = guard_live(self.lock()?)?;
        let (attached, left) = role_bits(role);
        let pid = current_pid();
        let st = guard.state();
        let holder = role_pid(st, role);
        if st.flags & attached != 0 && process_alive(holder) {
            return Err(ChannelError::RoleTaken(role));
        }
        st.flags = (st.flags | attached) & !left;
        match role {
            Role::Producer => st.producer_pid = pid,
            Role::Consumer => st.consumer_pid = pid,
        }
        trace!(%role, pid, "attached");
        Ok(())
    }

    /// Drop a role and wake the peer so it notices.
    pub fn detach(&self, role: Role) -> Result<()> {
        let mut guard = self.lock()?;
        let (attached, left) = role_bits(role);
        let st = guard.state();
        st.flags = (st.flags & !attached) | left;
        guard.broadcast_all();
        trace!(%role, "detached");
        Ok(())
    }

    /// Wake every waiter, e.g. after an abort request.
    pub fn wake_all(&self) -> Result<()> {
        let guard = self.lock()?;
        guard.broadcast_all();
        Ok(())
    }

    pub fn mark_torn_down(&self) -> Result<()> {
        let mut guard = self.lock()?;
        guard.state().flags |= TORN_DOWN;
        guard.broadcast_all();
        Ok(())
    }
}

fn role_bits(role: Role) -> (u32, u32) {
    match role {
        Role::Producer => (PRODUCER_ATTACHED, PRODUCER_LEFT),
        Role::Consumer => (CONSUMER_ATTACHED, CONSUMER_LEFT),
    }
}

fn role_pid(st: &QueueState, role: Role) -> i32 {
    match role {
        Role::Producer => st.producer_pid,
        Role::Consumer => st.consumer_pid,
    }
}

fn peer_loss(st: &QueueState, peer: Role) -> Option<PeerLoss> {
    let (_, left) = role_bits(peer);
    let gone = match peer {
        Role::Producer => PeerLoss::ProducerGone,
        Role::Consumer => PeerLoss::ConsumerGone,
    };
    if st.flags & left != 0 {
        return Some(gone);
    }
    let pid = role_pid(st, peer);
    if pid != 0 && !process_alive(pid) {
        return Some(gone);
    }
    None
}

fn guard_live(mut guard: QueueGuard<'_>) -> Result<QueueGuard<'_>> {
    if guard.state().flags & TORN_DOWN != 0 {
        return Err(ChannelError::TornDown);
    }
    Ok(guard)
}

/// Holds the segment lock; unlocks on drop.
pub(crate) struct QueueGuard<'a> {
    queue: &'a SharedQueue,
}

impl<'a> QueueGuard<'a> {
    pub fn state(&mut self) -> &mut QueueState {
        unsafe { &mut *self.queue.state_ptr() }
    }

    fn slot_mut(&mut self, idx: u32) -> &mut Slot {
        debug_assert!(idx < self.queue.layout.capacity);
        unsafe { &mut *self.queue.slots_ptr().add(idx as usize) }
    }

    /// The whole buffer table.
    pub fn entries(&mut self) -> &mut [BufferEntry] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.queue.table_ptr(),
                self.queue.layout.buffer_slots as usize,
            )
        }
    }

    /// The table entry a handle names, if the handle is current.
    pub fn entry(&mut self, handle: BufferHandle) -> Result<&mut BufferEntry> {
        let entry = self
            .entries()
            .get_mut(handle.index() as usize)
            .filter(|e| e.generation == handle.generation() && e.state() != EntryState::Free)
            .ok_or(BulkMisuse::UnknownHandle(handle))?;
        Ok(entry)
    }

    fn is_full(&mut self) -> bool {
        let st = self.state();
        st.count >= st.capacity
    }

    /// Count one more queued reference to a published buffer.
    fn retain(&mut self, handle: BufferHandle) -> Result<()> {
        let entry = self.entry(handle)?;
        if entry.state() != EntryState::Published {
            return Err(BulkMisuse::NotPublished {
                handle,
                state: entry.state().name(),
            }
            .into());
        }
        entry.refs += 1;
        Ok(())
    }

    fn unretain(&mut self, handle: BufferHandle) {
        if let Ok(entry) = self.entry(handle) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    fn push(&mut self, slot: &Slot) -> Result<()> {
        if let Some(handle) = slot.handle() {
            self.retain(handle)?;
        }
        let high = self.state().high;
        *self.slot_mut(high) = *slot;
        let st = self.state();
        st.high = (st.high + 1) % st.capacity;
        st.count += 1;
        self.signal(Cond::NotEmpty);
        Ok(())
    }

    fn pop(&mut self) -> Option<Slot> {
        if self.state().count == 0 {
            return None;
        }
        let low = self.state().low;
        let slot = *self.slot_mut(low);
        let st = self.state();
        st.low = (st.low + 1) % st.capacity;
        st.count -= 1;
        if let Some(handle) = slot.handle() {
            self.unretain(handle);
        }
        self.signal(Cond::NotFull);
        Some(slot)
    }

    fn take_reply(&mut self) -> Slot {
        let st = self.state();
        let slot = st.reply;
        st.reply_full = 0;
        st.reply = Slot::default();
        if let Some(handle) = slot.handle() {
            self.unretain(handle);
        }
        slot
    }

    /// Sleep on `cond` until `blocked` turns false.
    ///
    /// Returns `Ok(false)` when the wait budget runs out. Fails on teardown,
    /// abort, or loss of the peer named by `wait`.
    fn block_while<F>(&mut self, cond: Cond, wait: &Wait<'_>, mut blocked: F) -> Result<bool>
    where
        F: FnMut(&QueueState) -> bool,
    {
        self.block_on(cond, wait, |guard| blocked(guard.state()))
    }

    /// [`block_while`](Self::block_while) with a predicate that may look at
    /// the whole segment, not just the header.
    pub fn block_on<F>(&mut self, cond: Cond, wait: &Wait<'_>, mut blocked: F) -> Result<bool>
    where
        F: FnMut(&mut Self) -> bool,
    {
        loop {
            if self.state().flags & TORN_DOWN != 0 {
                return Err(ChannelError::TornDown);
            }
            if !blocked(self) {
                return Ok(true);
            }
            if wait.abort.swap(false, Ordering::AcqRel) {
                return Err(ChannelError::Cancelled);
            }
            if let Some(loss) = peer_loss(self.state(), wait.peer) {
                return Err(ChannelError::PeerLost(loss));
            }
            let Some(slice) = wait.slice() else {
                return Ok(false);
            };
            self.wait(cond, slice)?;
        }
    }

    fn wait(&mut self, cond: Cond, timeout: Duration) -> io::Result<bool> {
        self.queue.cond(cond).wait(&self.queue.mutex, Some(timeout))
    }

    pub fn signal(&self, cond: Cond) {
        // Both sides may sleep on the same condvar from several threads of
        // one process, so wake all of them.
        if let Err(e) = self.queue.cond(cond).broadcast() {
            warn!(error = %e, ?cond, "condvar broadcast failed");
        }
    }

    pub fn broadcast_all(&self) {
        self.signal(Cond::NotEmpty);
        self.signal(Cond::NotFull);
        self.signal(Cond::ReplyReady);
        self.signal(Cond::BufferFree);
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.queue.mutex.unlock() {
            warn!(error = %e, "channel unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_aligned_and_ordered() {
        let l = Layout::new(256, 64);
        assert!(l.state_off >= std::mem::size_of::<SyncBlock>());
        assert_eq!(l.slots_off % std::mem::align_of::<Slot>(), 0);
        assert_eq!(l.table_off % std::mem::align_of::<BufferEntry>(), 0);
        assert!(l.table_off >= l.slots_off + 256 * std::mem::size_of::<Slot>());
        assert_eq!(
            l.total,
            l.table_off + 64 * std::mem::size_of::<BufferEntry>()
        );
    }

    #[test]
    fn wait_without_budget_never_expires() {
        let flag = AtomicBool::new(false);
        let w = Wait::new(Role::Consumer, &flag, None, Duration::from_millis(5));
        assert_eq!(w.slice(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn wait_budget_expires() {
        let flag = AtomicBool::new(false);
        let w = Wait::new(Role::Consumer, &flag, Some(Duration::ZERO), Duration::from_millis(5));
        assert_eq!(w.slice(), None);
        assert!(matches!(
            w.expired(),
            ChannelError::PeerLost(PeerLoss::Unresponsive(_))
        ));
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel lifecycle: setup, open, role attach, teardown.
//
// The producer process usually calls `setup`, the consumer `open`; either
// side may do either. Segment names derive from the configured prefix and
// name:
//
//   <prefix>_LQ_CONN__<name>                  control segment
//   <prefix>_BUF__<name>_<index>_<serial>     one per shared buffer

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::BufferArena;
use crate::bulk::BulkTransfer;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::queue::SharedQueue;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::shm::ShmHandle;
use crate::shm_name;

// ---------------------------------------------------------------------------
// Process-local mapping cache
// ---------------------------------------------------------------------------

// pthread objects in the control segment must be used through a single
// virtual address per process (macOS requires it), so every Channel for one
// segment shares one mapping.
fn mapping_cache() -> &'static Mutex<HashMap<String, Weak<SharedQueue>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Weak<SharedQueue>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached_open(segment: &str, cfg: &ChannelConfig) -> Result<Arc<SharedQueue>> {
    let mut cache = mapping_cache().lock();
    if let Some(queue) = cache.get(segment).and_then(Weak::upgrade) {
        if queue.capacity() != cfg.capacity as usize || queue.buffer_slots() != cfg.buffer_slots {
            return Err(ChannelError::Config(format!(
                "channel {} is mapped with capacity {} / {} buffer slots",
                cfg.name,
                queue.capacity(),
                queue.buffer_slots()
            )));
        }
        return Ok(queue);
    }
    let queue = Arc::new(SharedQueue::open(segment, cfg.capacity, cfg.buffer_slots)?);
    cache.insert(segment.to_string(), Arc::downgrade(&queue));
    Ok(queue)
}

fn cached_create(segment: &str, cfg: &ChannelConfig) -> Result<Arc<SharedQueue>> {
    let mut cache = mapping_cache().lock();
    cache.retain(|_, q| q.strong_count() > 0);
    let queue = Arc::new(SharedQueue::create(
        segment,
        cfg.capacity,
        cfg.buffer_slots,
    )?);
    cache.insert(segment.to_string(), Arc::downgrade(&queue));
    Ok(queue)
}

fn purge(segment: &str) {
    mapping_cache().lock().remove(segment);
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A named producer/consumer channel in shared memory.
pub struct Channel {
    config: ChannelConfig,
    segment: String,
    queue: Arc<SharedQueue>,
    arena: BufferArena,
}

impl Channel {
    /// Create the channel, replacing any stale segment of the same name.
    pub fn setup(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let segment = shm_name::channel_segment(&config.prefix, &config.name);
        let queue = cached_create(&segment, &config)?;
        info!(
            name = %config.name,
            capacity = config.capacity,
            buffer_slots = config.buffer_slots,
            "channel set up"
        );
        Ok(Self::assemble(config, segment, queue))
    }

    /// Attach to a channel set up by another process (or thread).
    pub fn open(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let segment = shm_name::channel_segment(&config.prefix, &config.name);
        let queue = cached_open(&segment, &config)?;
        debug!(name = %config.name, "channel opened");
        Ok(Self::assemble(config, segment, queue))
    }

    fn assemble(config: ChannelConfig, segment: String, queue: Arc<SharedQueue>) -> Self {
        let arena = BufferArena::new(Arc::clone(&queue), &config.prefix, &config.name);
        Self {
            config,
            segment,
            queue,
            arena,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Attach as the producer. Fails with `RoleTaken` if a live process
    /// already holds the role.
    pub fn sender(&self) -> Result<Sender> {
        Sender::new(
            Arc::clone(&self.queue),
            self.arena.clone(),
            self.config.enqueue_timeout(),
            self.config.reply_timeout(),
            self.config.liveness_interval(),
        )
    }

    /// Attach as the consumer.
    pub fn receiver(&self) -> Result<Receiver> {
        Receiver::new(
            Arc::clone(&self.queue),
            self.arena.clone(),
            self.config.liveness_interval(),
        )
    }

    pub fn bulk(&self) -> BulkTransfer {
        BulkTransfer::new(self.arena.clone())
    }

    /// The shared buffer table, for building envelopes by hand.
    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    /// Envelopes currently queued.
    pub fn len(&self) -> Result<usize> {
        self.queue.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn live_buffers(&self) -> Result<usize> {
        self.arena.live()
    }

    /// End the channel for both sides: every blocked or later operation
    /// fails with `TornDown`, all shared buffers and the control segment are
    /// unlinked.
    pub fn teardown(self) -> Result<()> {
        self.queue.mark_torn_down()?;
        let freed = self.arena.release_all()?;
        self.queue.segment().unlink();
        purge(&self.segment);
        info!(name = %self.config.name, freed, "channel torn down");
        Ok(())
    }

    /// Remove the segments of a channel nobody uses any more, e.g. after a
    /// crash. Buffers are found through the control segment if it is still
    /// readable.
    pub fn clear_storage(config: &ChannelConfig) {
        let segment = shm_name::channel_segment(&config.prefix, &config.name);
        purge(&segment);
        if let Ok(queue) = SharedQueue::open(&segment, config.capacity, config.buffer_slots) {
            let arena = BufferArena::new(Arc::new(queue), &config.prefix, &config.name);
            match arena.release_all() {
                Ok(freed) => debug!(name = %config.name, freed, "abandoned buffers unlinked"),
                Err(e) => warn!(name = %config.name, error = %e, "could not free abandoned buffers"),
            }
        }
        ShmHandle::unlink_by_name(&segment);
    }
}

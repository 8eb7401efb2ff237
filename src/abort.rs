// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cancellation of blocked channel operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::queue::SharedQueue;

/// Unblocks the `notify`, `call` or `wait` its owner is blocked in.
///
/// The blocked operation fails with `ChannelError::Cancelled` and consumes
/// the request. A request made while nothing is blocked cancels the next
/// wait that would have to sleep.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    queue: Arc<SharedQueue>,
}

impl AbortHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>, queue: Arc<SharedQueue>) -> Self {
        Self { flag, queue }
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
        // Broadcasting under the lock closes the window between a waiter's
        // flag check and its condvar sleep.
        if let Err(e) = self.queue.wake_all() {
            warn!(error = %e, "abort could not wake waiters");
        }
        debug!("abort requested");
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Withdraw a request nobody has observed yet.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Consumer side of a channel: drains the queue and dispatches to a handler.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::abort::AbortHandle;
use crate::buffer::BufferArena;
use crate::bulk::BulkTransfer;
use crate::codec;
use crate::envelope::{Envelope, Payload, Slot};
use crate::error::{ChannelError, PeerLoss, ProtocolViolation, Result, Role};
use crate::kind::Kind;
use crate::queue::{SharedQueue, Wait};
use crate::value::Value;

/// Application logic on the consumer side.
///
/// Handlers run on the thread that pumps the receiver, one envelope at a
/// time and in queue order.
pub trait Handler {
    /// A one-way notification. Bulk values arrive as handles; the handler
    /// owns them and must consume, park or release them.
    fn on_notify(&mut self, kind: Kind, value: Value);

    /// A call. The returned value must have the shape of the paired reply
    /// kind.
    fn on_call(&mut self, kind: Kind, value: Value) -> Value;
}

pub struct Receiver {
    queue: Arc<SharedQueue>,
    arena: BufferArena,
    abort: Arc<AtomicBool>,
    probe: Duration,
}

impl Receiver {
    pub(crate) fn new(queue: Arc<SharedQueue>, arena: BufferArena, probe: Duration) -> Result<Self> {
        queue.attach(Role::Consumer)?;
        Ok(Self {
            queue,
            arena,
            abort: Arc::new(AtomicBool::new(false)),
            probe,
        })
    }

    /// Dispatch everything currently queued without blocking.
    pub fn pump<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<usize> {
        let mut n = 0;
        while self.pump_one(handler)? {
            n += 1;
        }
        Ok(n)
    }

    /// Dispatch at most one envelope. `Ok(false)` when the queue was empty.
    pub fn pump_one<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        match self.queue.try_dequeue()? {
            Some(slot) => {
                self.dispatch(&slot, handler)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Block until the queue is non-empty or `timeout` passes (`None` waits
    /// forever). Returns whether anything is queued.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let wait = Wait::new(Role::Producer, &self.abort, timeout, self.probe);
        self.queue.wait_not_empty(&wait)
    }

    /// Block for the first envelope as [`wait`](Self::wait) does, then
    /// dispatch it and everything queued behind it.
    pub fn pump_wait<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let wait = Wait::new(Role::Producer, &self.abort, timeout, self.probe);
        let Some(slot) = self.queue.dequeue(&wait)? else {
            return Ok(0);
        };
        self.dispatch(&slot, handler)?;
        Ok(1 + self.pump(handler)?)
    }

    /// Serve until the producer detaches, the channel is torn down or this
    /// receiver is aborted. Envelopes queued before the producer left are
    /// still dispatched.
    pub fn run<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            match self.wait(None) {
                Ok(_) => {
                    self.pump(handler)?;
                }
                Err(ChannelError::PeerLost(PeerLoss::ProducerGone)) => {
                    info!("producer gone, receiver stopping");
                    return Ok(());
                }
                Err(ChannelError::TornDown) => {
                    info!("channel torn down, receiver stopping");
                    return Ok(());
                }
                Err(ChannelError::Cancelled) => {
                    debug!("receiver aborted");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch<H: Handler + ?Sized>(&mut self, slot: &Slot, handler: &mut H) -> Result<()> {
        let env = Envelope::from_slot(slot).map_err(|e| {
            error!(code = slot.kind, tag = slot.tag, error = %e, "undecodable envelope");
            e
        })?;
        if env.kind.is_reply() {
            codec::discard(&self.arena, &env);
            error!(kind = %env.kind, seq = env.seq, "reply kind in the request queue");
            return Err(ProtocolViolation::UnexpectedReply {
                expected: None,
                found: env.kind,
            }
            .into());
        }

        let value = codec::decode(&self.arena, &env).map_err(|e| {
            error!(kind = %env.kind, seq = env.seq, error = %e, "undecodable payload");
            e
        })?;

        let Some(reply_kind) = env.kind.reply_kind() else {
            debug!(kind = %env.kind, "notification");
            handler.on_notify(env.kind, value);
            return Ok(());
        };

        debug!(kind = %env.kind, seq = env.seq, "call");
        let result = handler.on_call(env.kind, value);
        let reply = match codec::encode(&self.arena, reply_kind, env.seq, &result) {
            Ok(reply) => reply,
            Err(e) => {
                error!(kind = %reply_kind, seq = env.seq, error = %e, "handler returned an invalid reply");
                self.post_fault(&env);
                return Err(e);
            }
        };
        if let Err(e) = self.queue.post_reply(&reply.to_slot()) {
            codec::discard(&self.arena, &reply);
            return Err(e);
        }
        Ok(())
    }

    /// Tell the producer blocked on `call` that no reply will come.
    fn post_fault(&self, call: &Envelope) {
        let fault = Envelope {
            kind: Kind::FaultReply,
            seq: call.seq,
            payload: Payload::Int(call.kind.code() as i32),
        };
        if let Err(e) = self.queue.post_reply(&fault.to_slot()) {
            warn!(kind = %call.kind, seq = call.seq, error = %e, "could not post fault reply");
        }
    }

    pub fn bulk(&self) -> BulkTransfer {
        BulkTransfer::new(self.arena.clone())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(Arc::clone(&self.abort), Arc::clone(&self.queue))
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Err(e) = self.queue.detach(Role::Consumer) {
            warn!(error = %e, "consumer detach failed");
        }
    }
}

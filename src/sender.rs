// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Producer side of a channel.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::abort::AbortHandle;
use crate::buffer::{BufferArena, BufferHandle};
use crate::bulk::BulkTransfer;
use crate::codec;
use crate::envelope::Envelope;
use crate::error::{BulkMisuse, ChannelError, ProtocolViolation, Result, Role};
use crate::kind::Kind;
use crate::queue::{SharedQueue, Wait};
use crate::value::Value;

/// The call a sender is still waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingCall {
    kind: Kind,
    seq: u32,
}

/// Sends notifications and calls to the consumer.
///
/// At most one call is outstanding at a time. A call whose wait ended early
/// (abort or timeout) stays pending: the next call succeeds only once its
/// late reply has arrived and been drained.
pub struct Sender {
    queue: Arc<SharedQueue>,
    arena: BufferArena,
    abort: Arc<AtomicBool>,
    pending: Option<PendingCall>,
    next_seq: u32,
    enqueue_timeout: Option<Duration>,
    reply_timeout: Option<Duration>,
    probe: Duration,
}

impl Sender {
    pub(crate) fn new(
        queue: Arc<SharedQueue>,
        arena: BufferArena,
        enqueue_timeout: Option<Duration>,
        reply_timeout: Option<Duration>,
        probe: Duration,
    ) -> Result<Self> {
        queue.attach(Role::Producer)?;
        Ok(Self {
            queue,
            arena,
            abort: Arc::new(AtomicBool::new(false)),
            pending: None,
            next_seq: 1,
            enqueue_timeout,
            reply_timeout,
            probe,
        })
    }

    fn wait(&self, budget: Option<Duration>) -> Wait<'_> {
        Wait::new(Role::Consumer, &self.abort, budget, self.probe)
    }

    /// Send a one-way notification. Blocks while the queue is full or every
    /// shared buffer is still held by queued envelopes.
    pub fn notify(&mut self, kind: Kind, value: Value) -> Result<()> {
        if !kind.is_notification() {
            return Err(ProtocolViolation::NotANotification(kind).into());
        }
        let env = self.encode(kind, 0, &value)?;
        self.enqueue_owned(&env)?;
        debug!(%kind, "notify");
        Ok(())
    }

    /// Send a notification only if a slot is free right now.
    pub fn try_notify(&mut self, kind: Kind, value: Value) -> Result<bool> {
        if !kind.is_notification() {
            return Err(ProtocolViolation::NotANotification(kind).into());
        }
        let env = match codec::encode(&self.arena, kind, 0, &value) {
            Ok(env) => env,
            Err(ChannelError::BulkMisuse(BulkMisuse::TableExhausted(_))) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.queue.try_enqueue(&env.to_slot()) {
            Ok(true) => Ok(true),
            other => {
                codec::discard(&self.arena, &env);
                other
            }
        }
    }

    /// Send a call and block until its reply arrives.
    pub fn call(&mut self, kind: Kind, value: Value) -> Result<Value> {
        let reply_kind = kind
            .reply_kind()
            .ok_or(ProtocolViolation::NotACall(kind))?;
        if let Some(pending) = self.pending {
            self.drain_stale(pending)?;
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        let env = self.encode(kind, seq, &value)?;
        self.enqueue_owned(&env)?;
        self.pending = Some(PendingCall { kind, seq });
        debug!(%kind, seq, "call sent");

        let slot = self.queue.await_reply(&self.wait(self.reply_timeout))?;
        self.pending = None;

        let reply = Envelope::from_slot(&slot).map_err(|e| {
            error!(%kind, seq, error = %e, "undecodable reply");
            e
        })?;
        if reply.kind == Kind::FaultReply && reply.seq == seq {
            error!(%kind, seq, "consumer could not answer");
            return Err(ProtocolViolation::Unanswerable(kind).into());
        }
        if reply.kind != reply_kind {
            codec::discard(&self.arena, &reply);
            return Err(ProtocolViolation::UnexpectedReply {
                expected: Some(reply_kind),
                found: reply.kind,
            }
            .into());
        }
        if reply.seq != seq {
            codec::discard(&self.arena, &reply);
            return Err(ProtocolViolation::StaleReply {
                expected: seq,
                found: reply.seq,
            }
            .into());
        }
        let value = codec::decode(&self.arena, &reply)?;
        debug!(kind = %reply_kind, seq, "reply received");
        Ok(value)
    }

    /// A previous call ended without its reply. Drop the reply if it has
    /// arrived since, otherwise refuse to start another call.
    fn drain_stale(&mut self, pending: PendingCall) -> Result<()> {
        let Some(slot) = self.queue.take_reply()? else {
            return Err(ChannelError::CallPending(pending.kind));
        };
        self.pending = None;
        let reply = Envelope::from_slot(&slot)?;
        codec::discard(&self.arena, &reply);
        if reply.seq != pending.seq {
            return Err(ProtocolViolation::StaleReply {
                expected: pending.seq,
                found: reply.seq,
            }
            .into());
        }
        warn!(
            kind = %pending.kind,
            seq = pending.seq,
            "dropped late reply of an abandoned call"
        );
        Ok(())
    }

    /// Enqueue an envelope built elsewhere. The caller keeps ownership of
    /// any buffer it names until the consumer has dequeued it.
    pub fn send_envelope(&mut self, env: &Envelope) -> Result<()> {
        if env.kind.is_reply() {
            return Err(ProtocolViolation::UnexpectedReply {
                expected: None,
                found: env.kind,
            }
            .into());
        }
        self.queue
            .enqueue(&env.to_slot(), &self.wait(self.enqueue_timeout))
    }

    /// Encode for sending, waiting like an enqueue when no shared buffer is
    /// free.
    fn encode(&self, kind: Kind, seq: u32, value: &Value) -> Result<Envelope> {
        codec::encode_waiting(&self.arena, kind, seq, value, &self.wait(self.enqueue_timeout))
    }

    /// Enqueue an envelope whose message buffer this sender allocated,
    /// releasing that buffer if the envelope never makes it into the queue.
    fn enqueue_owned(&self, env: &Envelope) -> Result<()> {
        let res = self
            .queue
            .enqueue(&env.to_slot(), &self.wait(self.enqueue_timeout));
        if res.is_err() {
            codec::discard(&self.arena, env);
        }
        res
    }

    // -----------------------------------------------------------------------
    // Convenience wrappers
    // -----------------------------------------------------------------------

    pub fn print(&mut self, text: &str) -> Result<()> {
        self.notify(Kind::Print, Value::text(text))
    }

    /// Report progress as a fraction in `0.0..=1.0`.
    pub fn progress(&mut self, fraction: f32) -> Result<()> {
        self.notify(Kind::Progress, Value::Float(fraction))
    }

    /// Hand a published measurement buffer to the consumer for display.
    pub fn display_data(&mut self, handle: BufferHandle) -> Result<()> {
        self.notify(Kind::DisplayData, Value::Bulk(handle))
    }

    /// Show a modal message and wait until the user dismissed it.
    pub fn show_message(&mut self, text: &str) -> Result<()> {
        self.call(Kind::ShowMessage, Value::text(text)).map(drop)
    }

    /// Round trip that returns once everything sent before it was handled.
    pub fn sync(&mut self) -> Result<()> {
        self.call(Kind::Ack, Value::None).map(drop)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn bulk(&self) -> BulkTransfer {
        BulkTransfer::new(self.arena.clone())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(Arc::clone(&self.abort), Arc::clone(&self.queue))
    }

    /// Envelopes waiting in the queue.
    pub fn queued(&self) -> Result<usize> {
        self.queue.len()
    }

    /// Kind of the call still awaiting its reply, if any.
    pub fn pending_call(&self) -> Option<Kind> {
        self.pending.map(|p| p.kind)
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Err(e) = self.queue.detach(Role::Producer) {
            warn!(error = %e, "producer detach failed");
        }
    }
}

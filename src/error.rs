// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Failure outcomes of channel operations.
//
// Backpressure (a full queue) is never an error: the sender blocks. Every
// variant below means the channel is broken or the caller misused it, and
// none of them is retried automatically.

use std::io;
use std::time::Duration;

use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::buffer::BufferHandle;
use crate::kind::Kind;

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Which side of the channel a process is attached as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("peer lost: {0}")]
    PeerLost(PeerLoss),

    #[error("operation cancelled by abort request")]
    Cancelled,

    #[error("call {0} is still awaiting its reply")]
    CallPending(Kind),

    #[error("bulk transfer misuse: {0}")]
    BulkMisuse(#[from] BulkMisuse),

    #[error("channel has been torn down")]
    TornDown,

    #[error("{0} role is already attached to this channel")]
    RoleTaken(Role),

    #[error("invalid channel configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// Whether the channel must be considered unusable after this error.
    ///
    /// A cancelled call or a rejected second call leaves the channel intact;
    /// everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::Cancelled | ChannelError::CallPending(_))
    }
}

/// Decoded traffic that does not match the static kind table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolViolation {
    #[error("unknown envelope kind {0}")]
    UnknownKind(u32),

    #[error("unknown payload tag {tag} on {kind}")]
    UnknownTag { kind: Kind, tag: u32 },

    #[error("{kind} carries a {found} payload, expected {expected}")]
    ShapeMismatch {
        kind: Kind,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{kind} declares {declared} payload bytes but its buffer holds {actual}")]
    LengthMismatch {
        kind: Kind,
        declared: u64,
        actual: u64,
    },

    #[error("{kind} declares {count} strings, at most 4 fit inline")]
    TooManyStrings { kind: Kind, count: u32 },

    #[error("{0} is not a call kind")]
    NotACall(Kind),

    #[error("{0} is not a notification kind")]
    NotANotification(Kind),

    #[error("received {found} while expecting {expected:?}")]
    UnexpectedReply { expected: Option<Kind>, found: Kind },

    #[error("reply sequence {found} does not match outstanding call {expected}")]
    StaleReply { expected: u32, found: u32 },

    #[error("consumer could not produce a valid reply to {0}")]
    Unanswerable(Kind),

    #[error("reply mailbox already holds an untaken reply")]
    ReplyOverrun,

    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: Kind, reason: String },

    #[error("segment is not a channel (magic {0:#x})")]
    BadMagic(u32),
}

/// The other side stopped participating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeerLoss {
    #[error("consumer detached or exited")]
    ConsumerGone,

    #[error("producer detached or exited")]
    ProducerGone,

    #[error("no response within {0:?}")]
    Unresponsive(Duration),
}

/// Shared-buffer ownership rules broken by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkMisuse {
    #[error("handle {0} does not name a live buffer")]
    UnknownHandle(BufferHandle),

    #[error("buffer {handle} is {state}, not published")]
    NotPublished {
        handle: BufferHandle,
        state: &'static str,
    },

    #[error("buffer {handle} is still referenced by {refs} queued envelope(s)")]
    StillReferenced { handle: BufferHandle, refs: u32 },

    #[error("buffer {handle} holds {found}, expected {expected}")]
    WrongTag {
        handle: BufferHandle,
        expected: &'static str,
        found: &'static str,
    },

    #[error("all {0} shared buffer slots are in use")]
    TableExhausted(u32),

    #[error("bulk array of {rows}x{cols} does not match {len} values")]
    BadDimensions { rows: u64, cols: u64, len: usize },
}

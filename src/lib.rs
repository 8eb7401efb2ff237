// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory message channel between an experiment controller (the
// producer) and the display process that owns its widgets (the consumer).
//
// One control segment carries a FIFO queue of fixed-size envelopes, a reply
// mailbox for synchronous calls and the table of out-of-band shared buffers
// used for strings, records and measurement arrays.

#[cfg(not(unix))]
compile_error!("labipc requires POSIX shared memory and process-shared pthread objects");

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod error;
pub use error::{BulkMisuse, ChannelError, PeerLoss, ProtocolViolation, Result, Role};

pub mod kind;
pub use kind::{Kind, Shape};

pub mod envelope;
pub use envelope::{Envelope, Payload, Slot, StrLens, MAX_STRINGS};

mod value;
pub use value::{Field, Value};

mod record;

mod buffer;
pub use buffer::{BufferArena, BufferHandle, BufferTag};

mod queue;

pub mod codec;

pub mod bulk;
pub use bulk::{BulkData, BulkKind, BulkTransfer};

mod abort;
pub use abort::AbortHandle;

mod sender;
pub use sender::Sender;

mod receiver;
pub use receiver::{Handler, Receiver};

pub mod config;
pub use config::ChannelConfig;

pub mod channel;
pub use channel::Channel;

pub mod logging;

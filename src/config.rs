// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel configuration, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

pub const DEFAULT_CAPACITY: u32 = 256;
pub const MIN_CAPACITY: u32 = 2;
pub const MAX_CAPACITY: u32 = 65536;
pub const DEFAULT_BUFFER_SLOTS: u32 = 64;
pub const MAX_BUFFER_SLOTS: u32 = 4096;

/// Settings shared by both sides of a channel.
///
/// Timeouts are in milliseconds; `0` means wait forever.
///
/// ```toml
/// name = "scope"
/// capacity = 512
/// reply_timeout_ms = 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Channel name; both processes must use the same one.
    pub name: String,
    /// Optional namespace prepended to every segment name.
    pub prefix: String,
    /// Queue slots.
    pub capacity: u32,
    /// Entries in the shared buffer table.
    pub buffer_slots: u32,
    /// How long a notify may block on a full queue.
    pub enqueue_timeout_ms: u64,
    /// How long a call may wait for its reply.
    pub reply_timeout_ms: u64,
    /// How often a waiting side checks that its peer is still alive.
    pub liveness_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "labipc".to_string(),
            prefix: String::new(),
            capacity: DEFAULT_CAPACITY,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
            enqueue_timeout_ms: 30_000,
            reply_timeout_ms: 300_000,
            liveness_interval_ms: 250,
        }
    }
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout_ms = millis(timeout);
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.enqueue_timeout_ms = millis(timeout);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: ChannelConfig =
            toml::from_str(text).map_err(|e| ChannelError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChannelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ChannelError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(ChannelError::Config(msg));
        if self.name.is_empty() {
            return bad("name must not be empty".into());
        }
        for (field, s) in [("name", &self.name), ("prefix", &self.prefix)] {
            if s.contains('/') || s.contains('\0') {
                return bad(format!("{field} {s:?} contains '/' or NUL"));
            }
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.capacity) {
            return bad(format!(
                "capacity {} outside {MIN_CAPACITY}..={MAX_CAPACITY}",
                self.capacity
            ));
        }
        if !(1..=MAX_BUFFER_SLOTS).contains(&self.buffer_slots) {
            return bad(format!(
                "buffer_slots {} outside 1..={MAX_BUFFER_SLOTS}",
                self.buffer_slots
            ));
        }
        if self.liveness_interval_ms == 0 {
            return bad("liveness_interval_ms must be positive".into());
        }
        Ok(())
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        duration(self.enqueue_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        duration(self.reply_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

fn duration(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

fn millis(timeout: Option<Duration>) -> u64 {
    // Sub-millisecond timeouts round up so they never mean "forever".
    timeout.map_or(0, |d| (d.as_millis() as u64).max(1))
}

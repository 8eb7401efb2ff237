// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Segment naming for the channel and its shared buffers.

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm names. 0 disables shortening.
///
/// macOS limits names to `PSHMNAMLEN` (31); Linux allows 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm-safe name (with leading '/').
///
/// Names longer than [`SHM_NAME_MAX`] become `/<head>_<16 hex digits>`, the
/// head being as much of the original as fits.
pub fn make_shm_name(name: &str) -> String {
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }

    let suffix = format!("_{:016x}", fnv1a_64(full.as_bytes()));
    let room = SHM_NAME_MAX.saturating_sub(1 + suffix.len());
    let head: String = full[1..].chars().take(room).collect();
    let mut short = String::with_capacity(SHM_NAME_MAX);
    short.push('/');
    short.push_str(&head);
    short.push_str(&suffix);
    short
}

fn full_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}_")
    }
}

/// Name of the channel control segment (queue, reply mailbox, buffer table).
pub fn channel_segment(prefix: &str, name: &str) -> String {
    format!("{}LQ_CONN__{name}", full_prefix(prefix))
}

/// Name of one shared buffer segment. `serial` changes every time a table
/// entry gets a fresh segment, so a stale mapping never aliases a new buffer.
pub fn buffer_segment(prefix: &str, name: &str, index: u32, serial: u32) -> String {
    format!("{}BUF__{name}_{index}_{serial}", full_prefix(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn make_shm_name_prepends_slash() {
        let name = make_shm_name("foo");
        assert!(name.starts_with('/'));
        assert!(name.contains("foo"));
    }

    #[test]
    fn make_shm_name_keeps_existing_slash() {
        assert_eq!(&make_shm_name("/bar")[..4], "/bar");
    }

    #[test]
    fn segment_names_carry_prefix() {
        assert_eq!(channel_segment("", "run"), "LQ_CONN__run");
        assert_eq!(channel_segment("lab", "run"), "lab_LQ_CONN__run");
        assert_eq!(buffer_segment("lab", "run", 3, 9), "lab_BUF__run_3_9");
    }

    #[test]
    fn long_names_respect_limit() {
        let name = make_shm_name(&"x".repeat(300));
        if SHM_NAME_MAX > 0 {
            assert!(name.len() <= SHM_NAME_MAX);
        } else {
            assert_eq!(name.len(), 301);
        }
    }
}

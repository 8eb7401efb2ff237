// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory handle. Delegates to platform::PlatformShm.

use std::io;

use crate::platform::posix::ShmMode;
use crate::platform::PlatformShm;

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively; fail if it already exists.
    Create,
    /// Open existing; fail if it does not exist.
    Open,
    /// Create if missing, open if it already exists.
    CreateOrOpen,
}

/// A named, inter-process shared memory region.
///
/// Dropping the handle unmaps it but never removes the name; call
/// [`ShmHandle::unlink`] or [`ShmHandle::unlink_by_name`] once the last user
/// is done with the segment.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Map a named region of `size` bytes.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        let mode = match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
            ShmOpenMode::CreateOrOpen => ShmMode::CreateOrOpen,
        };
        let inner = PlatformShm::acquire(name, size, mode)?;
        Ok(Self { inner })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// The platform name used to open the segment.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Remove the backing object. Existing mappings stay usable.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    /// Remove a named segment without an open handle.
    pub fn unlink_by_name(name: &str) {
        PlatformShm::unlink_by_name(name);
    }

    /// Copy `data` to the start of the region.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        if data.len() > self.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffer too large for shared memory region ({} > {})",
                    data.len(),
                    self.size()
                ),
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr(), data.len());
        }
        Ok(())
    }

    /// View the first `len` bytes of the region.
    pub fn bytes(&self, len: usize) -> io::Result<&[u8]> {
        if len > self.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read past end of region ({len} > {})", self.size()),
            ));
        }
        Ok(unsafe { std::slice::from_raw_parts(self.as_ptr(), len) })
    }
}

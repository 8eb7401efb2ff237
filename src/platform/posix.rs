// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory regions and process-shared synchronisation objects.
//
// Unlike a refcounted segment, a `PlatformShm` never unlinks itself: the
// channel has an explicit setup/teardown lifecycle and shared buffers are
// unlinked by their final reader. Mutexes and condition variables are not
// separate named objects; they are initialised in place inside a region
// owned by the caller.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::shm_name;

// ---------------------------------------------------------------------------
// Robust mutex symbols: not exposed by `libc` on all platforms.
// macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

fn check(eno: libc::c_int) -> io::Result<()> {
    if eno == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(eno))
    }
}

// ---------------------------------------------------------------------------
// PlatformShm: a mapped POSIX shared memory object
// ---------------------------------------------------------------------------

/// Open mode flags for [`PlatformShm::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
}

// Safety: the mapping is process-shared by design; all mutation of the
// mapped bytes goes through the channel lock or single-owner buffers.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Map a named shared memory object of `size` bytes.
    ///
    /// Newly created objects are zero-filled by `ftruncate`. When opening an
    /// existing object its size must be at least `size`.
    pub fn acquire(name: &str, size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let perms: libc::mode_t = 0o600;

        let open_excl = || unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
            )
        };
        let open_existing =
            || unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };

        let (fd, created) = match mode {
            ShmMode::Create => (open_excl(), true),
            ShmMode::Open => (open_existing(), false),
            ShmMode::CreateOrOpen => {
                let f = open_excl();
                if f != -1 {
                    (f, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(e);
                    }
                    (open_existing(), false)
                }
            }
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        if created {
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        } else {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
            if (st.st_size as usize) < size {
                unsafe { libc::close(fd) };
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "segment {posix_name} is {} bytes, expected at least {size}",
                        st.st_size
                    ),
                ));
            }
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: posix_name,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name; existing mappings stay valid until unmapped.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        let posix_name = shm_name::make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// RawMutex / RawCond: pthread objects living inside a shared region
// ---------------------------------------------------------------------------

/// A `pthread_mutex_t` at a fixed address inside a shared mapping.
///
/// The pointee must stay mapped for the lifetime of this value.
#[derive(Clone, Copy)]
pub struct RawMutex(*mut libc::pthread_mutex_t);

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// # Safety
    /// `ptr` must point to mapped, suitably aligned memory large enough for a
    /// `pthread_mutex_t` that outlives the returned value.
    pub unsafe fn from_ptr(ptr: *mut libc::pthread_mutex_t) -> Self {
        Self(ptr)
    }

    /// Initialise the mutex in place as process-shared (and robust where
    /// supported). Must only be called once, by the segment creator.
    pub fn init(&self) -> io::Result<()> {
        unsafe {
            ptr::write_bytes(self.0, 0, 1);
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            check(libc::pthread_mutexattr_init(&mut attr))?;
            let mut eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            #[cfg(not(target_os = "macos"))]
            {
                if eno == 0 {
                    eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
                }
            }
            if eno == 0 {
                eno = libc::pthread_mutex_init(self.0, &attr);
            }
            libc::pthread_mutexattr_destroy(&mut attr);
            check(eno)
        }
    }

    /// Lock. Returns `Ok(true)` if the previous owner died while holding the
    /// lock; the mutex has then been made consistent again.
    pub fn lock(&self) -> io::Result<bool> {
        let eno = unsafe { libc::pthread_mutex_lock(self.0) };
        self.settle(eno)
    }

    pub fn unlock(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_mutex_unlock(self.0) })
    }

    fn settle(&self, eno: libc::c_int) -> io::Result<bool> {
        match eno {
            0 => Ok(false),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                check(unsafe { pthread_mutex_consistent(self.0) })?;
                Ok(true)
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }
}

/// A `pthread_cond_t` at a fixed address inside a shared mapping.
#[derive(Clone, Copy)]
pub struct RawCond(*mut libc::pthread_cond_t);

unsafe impl Send for RawCond {}
unsafe impl Sync for RawCond {}

impl RawCond {
    /// # Safety
    /// Same contract as [`RawMutex::from_ptr`].
    pub unsafe fn from_ptr(ptr: *mut libc::pthread_cond_t) -> Self {
        Self(ptr)
    }

    pub fn init(&self) -> io::Result<()> {
        unsafe {
            ptr::write_bytes(self.0, 0, 1);
            let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
            check(libc::pthread_condattr_init(&mut attr))?;
            let mut eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            if eno == 0 {
                eno = libc::pthread_cond_init(self.0, &attr);
            }
            libc::pthread_condattr_destroy(&mut attr);
            check(eno)
        }
    }

    /// Wait with `mtx` held. `None` blocks until signalled.
    /// Returns `Ok(true)` when woken, `Ok(false)` on timeout.
    pub fn wait(&self, mtx: &RawMutex, timeout: Option<Duration>) -> io::Result<bool> {
        let eno = match timeout {
            None => unsafe { libc::pthread_cond_wait(self.0, mtx.0) },
            Some(t) => {
                // pthread_cond_timedwait takes an absolute CLOCK_REALTIME deadline.
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let deadline = now + t;
                let ts = libc::timespec {
                    tv_sec: deadline.as_secs() as libc::time_t,
                    tv_nsec: deadline.subsec_nanos() as libc::c_long,
                };
                unsafe { libc::pthread_cond_timedwait(self.0, mtx.0, &ts) }
            }
        };
        match eno {
            libc::ETIMEDOUT => Ok(false),
            _ => mtx.settle(eno).map(|_| true),
        }
    }

    pub fn broadcast(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_cond_broadcast(self.0) })
    }
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

pub fn current_pid() -> i32 {
    std::process::id() as i32
}

/// Whether a process with `pid` still exists. EPERM means it exists but
/// belongs to another user.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

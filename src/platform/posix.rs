// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the process-local counting semaphore.
// A pthread mutex + condition variable pair guarding a permit counter.
// Unnamed `sem_init` semaphores are not available on macOS, so the
// counter is kept by hand.

use std::cell::UnsafeCell;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Errno helpers
// ---------------------------------------------------------------------------

#[inline]
fn check(eno: libc::c_int) -> io::Result<()> {
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Absolute `CLOCK_REALTIME` deadline `timeout` from now, as expected by
/// `pthread_cond_timedwait` with the default condattr clock.
fn deadline_after(timeout: Duration) -> libc::timespec {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let deadline = now.saturating_add(timeout);
    let secs = deadline.as_secs().min(libc::time_t::MAX as u64);
    libc::timespec {
        tv_sec: secs as libc::time_t,
        tv_nsec: deadline.subsec_nanos() as libc::c_long,
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore
// ---------------------------------------------------------------------------

/// Heap-pinned pthread state. pthread objects must not move once used,
/// hence the `Box` in `PlatformSemaphore`.
struct SemCell {
    mtx: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
    // Guarded by `mtx`.
    count: UnsafeCell<u32>,
}

pub struct PlatformSemaphore {
    cell: Box<SemCell>,
}

// Safety: `count` is only touched with `mtx` held; the pthread objects are
// designed for concurrent use and never move (boxed).
unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Create a semaphore holding `initial` permits.
    ///
    /// Uses the static pthread initializers, so no syscall is made here.
    pub fn new(initial: u32) -> io::Result<Self> {
        Ok(Self {
            cell: Box::new(SemCell {
                mtx: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
                cond: UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER),
                count: UnsafeCell::new(initial),
            }),
        })
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.cell.mtx.get()
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        self.cell.cond.get()
    }

    fn lock(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) })
    }

    fn unlock(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) })
    }

    /// Take one permit if available. Must be called with `mtx` held.
    fn take_locked(&self) -> bool {
        let count = unsafe { &mut *self.cell.count.get() };
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Block until a permit is available, then take it.
    pub fn wait(&self) -> io::Result<()> {
        self.lock()?;
        let mut result = Ok(());
        while !self.take_locked() {
            // Spurious wakeups just loop back to the counter check.
            let eno = unsafe { libc::pthread_cond_wait(self.cond_ptr(), self.mtx_ptr()) };
            if eno != 0 {
                result = Err(io::Error::from_raw_os_error(eno));
                break;
            }
        }
        self.unlock()?;
        result
    }

    /// Like `wait`, giving up after `timeout`.
    /// Returns `Ok(true)` if a permit was taken, `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let ts = deadline_after(timeout);
        self.lock()?;
        let result = loop {
            if self.take_locked() {
                break Ok(true);
            }
            let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), self.mtx_ptr(), &ts) };
            match eno {
                0 | libc::EINTR => {}
                // A post may have landed right at the deadline.
                libc::ETIMEDOUT => break Ok(self.take_locked()),
                _ => break Err(io::Error::from_raw_os_error(eno)),
            }
        };
        self.unlock()?;
        result
    }

    /// Take a permit without blocking.
    pub fn try_wait(&self) -> io::Result<bool> {
        self.lock()?;
        let taken = self.take_locked();
        self.unlock()?;
        Ok(taken)
    }

    /// Add `count` permits and wake up to `count` waiters.
    pub fn post(&self, count: u32) -> io::Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.lock()?;
        let slot = unsafe { &mut *self.cell.count.get() };
        *slot = slot.saturating_add(count);
        let eno = if count == 1 {
            unsafe { libc::pthread_cond_signal(self.cond_ptr()) }
        } else {
            unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) }
        };
        self.unlock()?;
        check(eno)
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        // `&mut self` guarantees no thread is blocked on us any more.
        unsafe {
            libc::pthread_cond_destroy(self.cond_ptr());
            libc::pthread_mutex_destroy(self.mtx_ptr());
        }
    }
}

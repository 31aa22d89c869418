// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform process-local counting semaphore.
// Delegates to platform::PlatformSemaphore (POSIX or Windows).

use std::io;
use std::time::Duration;

use crate::platform::PlatformSemaphore;

/// A counting semaphore backed by a kernel wait object.
///
/// On POSIX this is a heap-pinned `pthread_mutex_t` + `pthread_cond_t`
/// guarding a permit counter.
/// On Windows this is an unnamed kernel semaphore via `CreateSemaphoreW`.
///
/// This is the slow path the hybrid locks fall back to under contention.
pub struct Semaphore {
    inner: PlatformSemaphore,
}

impl Semaphore {
    /// Create a semaphore holding `initial` permits.
    pub fn new(initial: u32) -> io::Result<Self> {
        let inner = PlatformSemaphore::new(initial)?;
        Ok(Self { inner })
    }

    /// Block until a permit is available and take it.
    pub fn wait(&self) -> io::Result<()> {
        self.inner.wait()
    }

    /// Wait for a permit for at most `timeout`.
    /// Returns `Ok(true)` if a permit was taken, `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        self.inner.wait_timeout(timeout)
    }

    /// Take a permit without blocking.
    /// Returns `Ok(false)` if none was available.
    pub fn try_wait(&self) -> io::Result<bool> {
        self.inner.try_wait()
    }

    /// Release `count` permits, waking up to `count` blocked waiters.
    pub fn post(&self, count: u32) -> io::Result<()> {
        self.inner.post(count)
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

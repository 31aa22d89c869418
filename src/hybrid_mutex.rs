// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Hybrid user/kernel mutex.
// Uncontended enter/leave is a single atomic RMW; only contended callers
// touch the kernel wait object, which is created on first contention.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::{LockStats, Semaphore};

/// A non-reentrant mutex with an atomic fast path.
///
/// `waiters` counts the threads inside the critical section plus those
/// blocked on it. The thread that moves it from 0 to 1 owns the lock
/// outright; everyone else blocks on an auto-reset wait object until a
/// `leave` hands the lock over.
///
/// Calling `enter` twice from the same thread without a `leave` deadlocks.
/// Calling `leave` without a matching `enter` is a usage error and trips a
/// debug assertion.
pub struct HybridMutex {
    waiters: AtomicI32,
    event: OnceLock<Semaphore>,
    stats: Arc<LockStats>,
}

impl HybridMutex {
    /// Create an unlocked mutex with its own private [`LockStats`].
    pub fn new() -> Self {
        Self::with_stats(Arc::new(LockStats::new()))
    }

    /// Create an unlocked mutex reporting into a shared [`LockStats`].
    pub fn with_stats(stats: Arc<LockStats>) -> Self {
        Self {
            waiters: AtomicI32::new(0),
            event: OnceLock::new(),
            stats,
        }
    }

    /// The wait object, created on first use.
    fn event(&self) -> io::Result<&Semaphore> {
        if self.event.get().is_none() {
            let sem = Semaphore::new(0)?;
            // Losing the race just drops our spare.
            let _ = self.event.set(sem);
        }
        self.event
            .get()
            .ok_or_else(|| io::Error::other("hybrid mutex wait object missing"))
    }

    /// Acquire the mutex, blocking on the kernel wait object if contended.
    pub fn enter(&self) -> io::Result<()> {
        if self.try_enter() {
            return Ok(());
        }
        // The wait object must exist before this thread counts as a waiter:
        // once counted, a `leave` may hand it a permit.
        let event = self.event()?;
        self.stats.on_enter();
        if self.waiters.fetch_add(1, Ordering::Acquire) == 0 {
            return Ok(());
        }
        self.stats.on_contended();
        event.wait()
    }

    /// Acquire the mutex only if nobody holds or waits for it.
    pub fn try_enter(&self) -> bool {
        let acquired = self
            .waiters
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.stats.on_enter();
        }
        acquired
    }

    /// Release the mutex, handing it to exactly one blocked thread if any.
    pub fn leave(&self) -> io::Result<()> {
        self.stats.on_leave();
        let prev = self.waiters.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "HybridMutex::leave without matching enter");
        if prev == 1 {
            return Ok(());
        }
        self.event()?.post(1)?;
        self.stats.on_handoff();
        Ok(())
    }

    /// Acquire the mutex and return a guard that releases it on drop.
    pub fn lock(&self) -> io::Result<HybridGuard<'_>> {
        self.enter()?;
        Ok(HybridGuard { mutex: self })
    }

    /// Whether another thread is inside or blocked.
    pub fn is_contended(&self) -> bool {
        self.waiters.load(Ordering::Relaxed) > 1
    }

    /// Threads inside plus threads waiting.
    pub fn waiter_count(&self) -> i32 {
        self.waiters.load(Ordering::Relaxed)
    }

    /// The diagnostics object this mutex reports into.
    pub fn stats(&self) -> &Arc<LockStats> {
        &self.stats
    }
}

impl Default for HybridMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HybridMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridMutex")
            .field("waiters", &self.waiter_count())
            .field("wait_object", &self.event.get().is_some())
            .finish()
    }
}

/// RAII guard: the mutex is held for the guard's lifetime.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct HybridGuard<'a> {
    mutex: &'a HybridMutex,
}

impl Drop for HybridGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.leave() {
            tracing::error!(error = %e, "failed to signal hybrid mutex waiter");
        }
    }
}

/// A value only reachable through a [`HybridMutex`].
///
/// Backs the small shared counters and bookkeeping structs that sessions
/// update concurrently.
pub struct HybridCell<T> {
    mutex: HybridMutex,
    value: UnsafeCell<T>,
}

// Safety: `value` is only handed out while `mutex` is held.
unsafe impl<T: Send> Sync for HybridCell<T> {}

impl<T> HybridCell<T> {
    pub fn new(value: T) -> Self {
        Self::with_stats(value, Arc::new(LockStats::new()))
    }

    pub fn with_stats(value: T, stats: Arc<LockStats>) -> Self {
        Self {
            mutex: HybridMutex::with_stats(stats),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// `f` must not call back into the same cell; the mutex is not reentrant.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> io::Result<R> {
        let _guard = self.mutex.lock()?;
        // SAFETY: the guard makes this the only live reference.
        Ok(f(unsafe { &mut *self.value.get() }))
    }

    pub fn mutex(&self) -> &HybridMutex {
        &self.mutex
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for HybridCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

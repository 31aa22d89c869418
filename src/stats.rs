// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Acquisition/contention diagnostics shared by a family of hybrid mutexes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Diagnostic counters for one or more [`HybridMutex`](crate::HybridMutex)es.
///
/// Whoever constructs the mutexes owns the stats object and hands the same
/// `Arc<LockStats>` to every mutex it wants aggregated.
#[derive(Debug, Default)]
pub struct LockStats {
    active: AtomicI64,
    contended: AtomicI64,
    total_acquisitions: AtomicU64,
    total_contended: AtomicU64,
}

/// A point-in-time copy of [`LockStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStatsSnapshot {
    /// Threads currently inside or waiting for a mutex.
    pub active: i64,
    /// Threads currently blocked on a wait object.
    pub contended: i64,
    /// Every `enter` since creation.
    pub total_acquisitions: u64,
    /// Every `enter` that had to take the slow path.
    pub total_contended: u64,
}

impl LockStats {
    /// All counters start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_enter(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
        self.total_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_leave(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn on_handoff(&self) {
        self.contended.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn contended(&self) -> i64 {
        self.contended.load(Ordering::Relaxed)
    }

    pub fn total_acquisitions(&self) -> u64 {
        self.total_acquisitions.load(Ordering::Relaxed)
    }

    pub fn total_contended(&self) -> u64 {
        self.total_contended.load(Ordering::Relaxed)
    }

    /// Read all four counters. The fields are loaded one by one, so the
    /// snapshot is only consistent when the mutexes are quiescent.
    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            active: self.active(),
            contended: self.contended(),
            total_acquisitions: self.total_acquisitions(),
            total_contended: self.total_contended(),
        }
    }
}

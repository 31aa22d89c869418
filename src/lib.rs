// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Concurrency and shared-resource arbitration primitives for industrial
// communication sessions: a hybrid user/kernel mutex, a packed-state-word
// reader/writer lock with writer priority, a single-flight coalescing
// executor, and reader-counted resource markers with deferred mutations.

mod platform;
mod unwind;

mod semaphore;
pub use semaphore::Semaphore;

mod stats;
pub use stats::{LockStats, LockStatsSnapshot};

mod hybrid_mutex;
pub use hybrid_mutex::{HybridCell, HybridGuard, HybridMutex};

pub mod rw_lock;
pub use rw_lock::{ReadGuard, ReaderWriterLock, WriteGuard};

mod coalesce;
pub use coalesce::{CoalescingExecutor, Job, Scheduler, ThreadScheduler};

mod resource_marker;
pub use resource_marker::{MarkerReadGuard, Mutation, ResourceMarker};

mod marker_registry;
pub use marker_registry::MarkerRegistry;

mod increment_count;
pub use increment_count::IncrementCount;

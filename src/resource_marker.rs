// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Reader reference count plus a queue of mutations deferred until the last
// reader of a shared resource (typically a file being downloaded) leaves.

use std::collections::VecDeque;
use std::io;
use std::time::SystemTime;

use crate::unwind::run_contained;
use crate::HybridCell;

/// A deferred mutation.
pub type Mutation = Box<dyn FnOnce() + Send + 'static>;

struct MarkerState {
    active_readers: usize,
    deferred: VecDeque<Mutation>,
    last_active_at: SystemTime,
    completed_reads: u64,
}

impl MarkerState {
    fn touch(&mut self) {
        self.last_active_at = SystemTime::now();
    }

    fn drain(&mut self, name: &str) {
        let count = self.deferred.len();
        if count > 0 {
            tracing::debug!(marker = %name, count, "running deferred mutations");
        }
        while let Some(action) = self.deferred.pop_front() {
            run_contained(name, action);
        }
    }
}

/// Arbitrates between readers of one named resource and mutations of it.
///
/// Readers bracket their use with [`enter_read`](Self::enter_read) /
/// [`exit_read`](Self::exit_read). A mutation requested while readers are
/// active is queued and runs, in submission order, when the last reader
/// leaves. A panicking mutation is logged and the rest of the queue still
/// runs.
///
/// Mutations run while the marker's internal mutex is held so no reader can
/// start in between; they must not call back into the same marker.
pub struct ResourceMarker {
    name: String,
    created_at: SystemTime,
    state: HybridCell<MarkerState>,
}

impl ResourceMarker {
    pub fn new(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            created_at: now,
            state: HybridCell::new(MarkerState {
                active_readers: 0,
                deferred: VecDeque::new(),
                last_active_at: now,
                completed_reads: 0,
            }),
        }
    }

    /// Register a reader.
    pub fn enter_read(&self) -> io::Result<()> {
        self.state.with(|s| {
            s.active_readers += 1;
            s.touch();
        })
    }

    /// Unregister a reader; the last one out runs every queued mutation.
    pub fn exit_read(&self) -> io::Result<()> {
        self.state.with(|s| {
            debug_assert!(s.active_readers > 0, "exit_read without enter_read on {}", self.name);
            s.active_readers = s.active_readers.saturating_sub(1);
            s.completed_reads += 1;
            s.touch();
            if s.active_readers == 0 {
                s.drain(&self.name);
            }
        })
    }

    /// Run `action` now if nobody is reading, else queue it behind the
    /// active readers.
    pub fn request_mutation<F>(&self, action: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.with(|s| {
            if s.active_readers == 0 {
                run_contained(&self.name, action);
            } else {
                tracing::debug!(
                    marker = %self.name,
                    readers = s.active_readers,
                    "mutation deferred behind active readers"
                );
                s.deferred.push_back(Box::new(action));
            }
        })
    }

    /// No readers and no queued mutations.
    pub fn can_evict(&self) -> io::Result<bool> {
        self.state
            .with(|s| s.active_readers == 0 && s.deferred.is_empty())
    }

    /// Register a reader for the lifetime of the returned guard.
    pub fn read_guard(&self) -> io::Result<MarkerReadGuard<'_>> {
        self.enter_read()?;
        Ok(MarkerReadGuard { marker: self })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_active_at(&self) -> io::Result<SystemTime> {
        self.state.with(|s| s.last_active_at)
    }

    pub fn completed_reads(&self) -> io::Result<u64> {
        self.state.with(|s| s.completed_reads)
    }

    pub fn active_readers(&self) -> io::Result<usize> {
        self.state.with(|s| s.active_readers)
    }

    pub fn pending_mutations(&self) -> io::Result<usize> {
        self.state.with(|s| s.deferred.len())
    }
}

impl std::fmt::Debug for ResourceMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMarker")
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// RAII reader registration on a [`ResourceMarker`].
#[must_use = "the read is unregistered as soon as the guard is dropped"]
pub struct MarkerReadGuard<'a> {
    marker: &'a ResourceMarker,
}

impl Drop for MarkerReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.marker.exit_read() {
            tracing::error!(marker = %self.marker.name, error = %e, "failed to release read");
        }
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Name → ResourceMarker table for a file server.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use crate::{ReaderWriterLock, ResourceMarker};

/// Hands out one shared [`ResourceMarker`] per resource name and forgets
/// markers nobody needs any more.
///
/// Lookups take the registry lock shared; inserts and eviction take it
/// exclusive. Eviction also takes each marker's internal mutex, always in
/// that order; markers never call back into the registry.
pub struct MarkerRegistry {
    lock: ReaderWriterLock,
    markers: UnsafeCell<HashMap<String, Arc<ResourceMarker>>>,
}

// Safety: `markers` is read only under the shared lock and written only
// under the exclusive lock.
unsafe impl Sync for MarkerRegistry {}

impl MarkerRegistry {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            lock: ReaderWriterLock::new()?,
            markers: UnsafeCell::new(HashMap::new()),
        })
    }

    fn with_read<R>(&self, f: impl FnOnce(&HashMap<String, Arc<ResourceMarker>>) -> R) -> io::Result<R> {
        let _guard = self.lock.read()?;
        // SAFETY: writers are excluded while the read guard lives.
        Ok(f(unsafe { &*self.markers.get() }))
    }

    fn with_write<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Arc<ResourceMarker>>) -> R,
    ) -> io::Result<R> {
        let _guard = self.lock.write()?;
        // SAFETY: the write guard excludes every other access.
        Ok(f(unsafe { &mut *self.markers.get() }))
    }

    /// The marker for `name`, if one is registered.
    pub fn get(&self, name: &str) -> io::Result<Option<Arc<ResourceMarker>>> {
        self.with_read(|m| m.get(name).cloned())
    }

    /// The marker for `name`, registering a fresh one if needed.
    pub fn get_or_create(&self, name: &str) -> io::Result<Arc<ResourceMarker>> {
        if let Some(marker) = self.get(name)? {
            return Ok(marker);
        }
        self.with_write(|m| {
            // Another caller may have inserted it between the two locks.
            Arc::clone(
                m.entry(name.to_string())
                    .or_insert_with(|| Arc::new(ResourceMarker::new(name))),
            )
        })
    }

    /// Drop every marker that has no readers, no queued mutations and no
    /// holder outside the registry. Returns how many were removed.
    pub fn evict_idle(&self) -> io::Result<usize> {
        let removed = self.with_write(|m| {
            let before = m.len();
            m.retain(|name, marker| {
                if Arc::strong_count(marker) > 1 {
                    return true;
                }
                match marker.can_evict() {
                    Ok(idle) => !idle,
                    Err(e) => {
                        tracing::warn!(marker = %name, error = %e, "keeping marker, state unreadable");
                        true
                    }
                }
            });
            before - m.len()
        })?;
        if removed > 0 {
            tracing::debug!(removed, "evicted idle resource markers");
        }
        Ok(removed)
    }

    pub fn len(&self) -> io::Result<usize> {
        self.with_read(|m| m.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        self.with_read(|m| m.is_empty())
    }
}

impl std::fmt::Debug for MarkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerRegistry").finish_non_exhaustive()
    }
}

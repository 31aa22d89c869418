// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wrap-around sequence counter (message ids, frame sequence numbers)
// shared between sessions.

use std::io;

use crate::HybridCell;

#[derive(Debug, Clone, Copy)]
struct Counter {
    current: i64,
    start: i64,
    max: i64,
    step: i64,
}

impl Counter {
    fn advance(&mut self) -> i64 {
        let value = self.current;
        self.current = match self.current.checked_add(self.step) {
            Some(next) if (self.start..=self.max).contains(&next) => next,
            Some(next) if next < self.start => self.max,
            Some(_) => self.start,
            // Stepped off the end of the i64 range.
            None if self.step < 0 => self.max,
            None => self.start,
        };
        value
    }
}

/// A counter cycling through `start..=max` in increments of `step`.
///
/// Moving past `max` wraps to `start`; with a negative step, moving below
/// `start` wraps to `max`.
pub struct IncrementCount {
    inner: HybridCell<Counter>,
}

impl IncrementCount {
    /// A counter starting at `start` with step 1.
    ///
    /// # Errors
    /// `InvalidInput` if `start > max`.
    pub fn new(start: i64, max: i64) -> io::Result<Self> {
        if start > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("start {start} exceeds max {max}"),
            ));
        }
        Ok(Self {
            inner: HybridCell::new(Counter {
                current: start,
                start,
                max,
                step: 1,
            }),
        })
    }

    /// Return the current value and advance.
    pub fn next(&self) -> io::Result<i64> {
        self.inner.with(Counter::advance)
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> io::Result<i64> {
        self.inner.with(|c| c.current)
    }

    /// Move the counter to `value`, clamped into `start..=max`.
    pub fn reset_current(&self, value: i64) -> io::Result<()> {
        self.inner.with(|c| c.current = value.clamp(c.start, c.max))
    }

    /// Change the upper bound. Ignored unless `max >= start`; pulls the
    /// current value back to `start` if it is now out of range.
    pub fn reset_max(&self, max: i64) -> io::Result<()> {
        self.inner.with(|c| {
            if max < c.start {
                return;
            }
            if c.current > max {
                c.current = c.start;
            }
            c.max = max;
        })
    }

    /// Change the lower bound. Ignored unless `start <= max`; raises the
    /// current value to `start` if it is now out of range.
    pub fn reset_start(&self, start: i64) -> io::Result<()> {
        self.inner.with(|c| {
            if start > c.max {
                return;
            }
            if c.current < start {
                c.current = start;
            }
            c.start = start;
        })
    }

    pub fn set_step(&self, step: i64) -> io::Result<()> {
        self.inner.with(|c| c.step = step)
    }
}

impl std::fmt::Debug for IncrementCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementCount").finish_non_exhaustive()
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-flight executor: collapses bursts of "state changed, redo the work"
// triggers into as few runs of one action as possible without ever missing
// a trigger.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::unwind::run_contained;

/// A unit of work handed to a [`Scheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs off the calling thread.
///
/// An error means the job was not (and will not be) run. The executor then
/// keeps its triggers pending and reports the error from
/// [`CoalescingExecutor::trigger`].
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, job: Job) -> io::Result<()>;
}

impl<F> Scheduler for F
where
    F: Fn(Job) -> io::Result<()> + Send + Sync + 'static,
{
    fn schedule(&self, job: Job) -> io::Result<()> {
        self(job)
    }
}

/// Spawns one named OS thread per job.
///
/// Drains are rare by construction, so a pool buys little here.
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    name: String,
}

impl ThreadScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("coalesce-drain")
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) -> io::Result<()> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(job)
            .map(|_| ())
    }
}

struct Inner {
    // Triggers not yet covered by a completed run.
    pending: AtomicUsize,
    // Set while a drain is scheduled or running.
    running: AtomicBool,
    runs: AtomicU64,
    action: Box<dyn Fn() + Send + Sync>,
    scheduler: Box<dyn Scheduler>,
}

impl Inner {
    fn schedule_drain(self: &Arc<Self>) -> io::Result<()> {
        let worker = Arc::clone(self);
        let scheduled = self.scheduler.schedule(Box::new(move || worker.drain()));
        if let Err(e) = &scheduled {
            // Triggers stay pending; the next trigger retries.
            self.running.store(false, Ordering::SeqCst);
            tracing::error!(error = %e, "failed to schedule coalesced action");
        }
        scheduled
    }

    fn drain(&self) {
        loop {
            loop {
                let snapshot = self.pending.load(Ordering::SeqCst);
                self.run_once();
                // Fails iff a trigger landed while the action ran.
                if self
                    .pending
                    .compare_exchange(snapshot, 0, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
            self.running.store(false, Ordering::SeqCst);

            // A trigger between the reset of `pending` and the reset of
            // `running` saw a drain in flight and did not schedule one.
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            tracing::trace!("trigger raced drain completion, draining again");
        }
    }

    fn run_once(&self) {
        run_contained("coalesced action", || (self.action)());
        self.runs.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ensures an action never runs concurrently with itself while every
/// [`trigger`](Self::trigger) is eventually followed by a run that starts
/// after it.
///
/// Typical use is persistence: every mutation of a cached list triggers,
/// and the action writes the list's current state out. A burst of N
/// triggers costs far fewer than N writes.
///
/// The action should report its own failures. A panic is caught and logged
/// and does not stop later triggers from running it again.
pub struct CoalescingExecutor {
    inner: Arc<Inner>,
}

impl CoalescingExecutor {
    /// Create an executor draining on a fresh [`ThreadScheduler`] thread.
    pub fn new<F>(action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_scheduler(action, ThreadScheduler::default())
    }

    pub fn with_scheduler<F, S>(action: F, scheduler: S) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        S: Scheduler,
    {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                action: Box::new(action),
                scheduler: Box::new(scheduler),
            }),
        }
    }

    /// Request a run. Never blocks.
    ///
    /// # Errors
    /// The scheduler refused the drain. The trigger stays pending and is only
    /// run once a later `trigger` schedules successfully, so a caller that
    /// will not trigger again should retry.
    pub fn trigger(&self) -> io::Result<()> {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.schedule_drain()?;
        }
        Ok(())
    }

    /// Number of completed action runs (panicked runs included).
    pub fn runs(&self) -> u64 {
        self.inner.runs.load(Ordering::Relaxed)
    }

    /// Triggers not yet covered by a completed run.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Whether a drain is scheduled or running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// No drain in flight and nothing left to drain.
    pub fn is_idle(&self) -> bool {
        !self.is_running() && self.pending() == 0
    }
}

impl std::fmt::Debug for CoalescingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingExecutor")
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .field("runs", &self.runs())
            .finish()
    }
}

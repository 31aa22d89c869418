// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-reader/single-writer lock with writer priority.
// The whole lock state lives in one packed word:
//
//   bits  0..=2   mode
//   bits  3..=11  readers inside the section
//   bits 12..=20  readers blocked
//   bits 21..=29  writers blocked
//   bits 32..=63  reader admission generation
//
// The low 32 bits are the lock proper. The generation is bumped each time
// the queued readers are let in as a batch, so a reader that gives up
// waiting can tell whether it was admitted before it withdrew.
//
// Every transition is a read-modify-CAS of the whole word. Blocked threads
// sleep on one of two counting semaphores (reader gate, writer gate).

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::Semaphore;

const MODE_MASK: u32 = 0x7;
const COUNT_MASK: u32 = 0x1FF;
const ACTIVE_READERS_SHIFT: u32 = 3;
const WAITING_READERS_SHIFT: u32 = 12;
const WAITING_WRITERS_SHIFT: u32 = 21;
const ADMISSIONS_SHIFT: u32 = 32;

/// Largest value any of the three counters can hold.
pub const MAX_COUNT: u32 = COUNT_MASK;

/// Who currently holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    Free = 0,
    OwnedByWriter = 1,
    OwnedByReaders = 2,
    /// Readers are inside and a writer is queued; new readers must queue too.
    OwnedByReadersAndWriterPending = 3,
    /// A writer has been woken and the lock is kept for it.
    ReservedForWriter = 4,
}

impl Mode {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Free),
            1 => Some(Self::OwnedByWriter),
            2 => Some(Self::OwnedByReaders),
            3 => Some(Self::OwnedByReadersAndWriterPending),
            4 => Some(Self::ReservedForWriter),
            _ => None,
        }
    }
}

/// Decoded view of the state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub mode: Mode,
    pub active_readers: u32,
    pub waiting_readers: u32,
    pub waiting_writers: u32,
    /// How many times queued readers were admitted as a batch. Wraps.
    pub admissions: u32,
}

impl LockState {
    fn unpack(word: u64) -> Self {
        let admissions = (word >> ADMISSIONS_SHIFT) as u32;
        let word = word as u32;
        let mode = Mode::from_bits(word & MODE_MASK);
        debug_assert!(mode.is_some(), "corrupt lock state word {word:#x}");
        Self {
            mode: mode.unwrap_or(Mode::Free),
            active_readers: (word >> ACTIVE_READERS_SHIFT) & COUNT_MASK,
            waiting_readers: (word >> WAITING_READERS_SHIFT) & COUNT_MASK,
            waiting_writers: (word >> WAITING_WRITERS_SHIFT) & COUNT_MASK,
            admissions,
        }
    }

    fn pack(self) -> u64 {
        debug_assert!(self.active_readers <= COUNT_MASK, "too many active readers");
        debug_assert!(self.waiting_readers <= COUNT_MASK, "too many waiting readers");
        debug_assert!(self.waiting_writers <= COUNT_MASK, "too many waiting writers");
        let lock = (self.mode as u32)
            | (self.active_readers << ACTIVE_READERS_SHIFT)
            | (self.waiting_readers << WAITING_READERS_SHIFT)
            | (self.waiting_writers << WAITING_WRITERS_SHIFT);
        u64::from(lock) | (u64::from(self.admissions) << ADMISSIONS_SHIFT)
    }

    fn any_waiting(&self) -> bool {
        self.waiting_readers > 0 || self.waiting_writers > 0
    }

    /// Let every queued reader in at once.
    fn admit_waiting_readers(&mut self) -> Wake {
        let n = self.waiting_readers;
        self.mode = Mode::OwnedByReaders;
        self.active_readers += n;
        self.waiting_readers = 0;
        self.admissions = self.admissions.wrapping_add(1);
        Wake::Readers(n)
    }

    fn hand_to_writer(&mut self) -> Wake {
        self.mode = Mode::ReservedForWriter;
        self.waiting_writers -= 1;
        Wake::Writer
    }

    fn done_writing(&mut self) -> Wake {
        if !self.any_waiting() {
            self.mode = Mode::Free;
            Wake::Nobody
        } else if self.waiting_writers > 0 {
            self.hand_to_writer()
        } else {
            self.admit_waiting_readers()
        }
    }

    fn done_reading(&mut self) -> Wake {
        debug_assert!(self.active_readers > 0, "reader leave without enter");
        self.active_readers = self.active_readers.saturating_sub(1);
        if self.active_readers > 0 {
            Wake::Nobody
        } else if !self.any_waiting() {
            self.mode = Mode::Free;
            Wake::Nobody
        } else if self.waiting_writers > 0 {
            self.hand_to_writer()
        } else {
            // Only reachable if readers queued without a writer ahead of them.
            self.admit_waiting_readers()
        }
    }
}

/// Which gate to open after a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Nobody,
    Writer,
    Readers(u32),
}

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Acquired,
    Wait,
    Expired,
}

/// A multi-reader/single-writer lock with writer-priority fairness.
///
/// Once a writer is waiting no new reader is admitted; readers already inside
/// finish normally, then the writer runs. There is no ordering among readers
/// or among writers: a woken writer may lose the lock to a writer that
/// arrives at the same moment, in which case it queues again.
///
/// Each lock guards one resource. Never hold two of these (or one of these
/// and a [`HybridMutex`](crate::HybridMutex)) at once unless every caller
/// acquires them in the same global order.
pub struct ReaderWriterLock {
    word: AtomicU64,
    readers: Semaphore,
    writers: Semaphore,
}

impl ReaderWriterLock {
    /// Create an unlocked lock together with its two wait objects.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            word: AtomicU64::new(0),
            readers: Semaphore::new(0)?,
            writers: Semaphore::new(0)?,
        })
    }

    /// Apply `f` to the current state and publish it with a whole-word CAS,
    /// retrying on interference. `f` may run several times.
    fn transition<T>(&self, mut f: impl FnMut(&mut LockState) -> T) -> T {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let mut state = LockState::unpack(current);
            let out = f(&mut state);
            match self.word.compare_exchange_weak(
                current,
                state.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return out,
                Err(actual) => current = actual,
            }
        }
    }

    fn wake(&self, wake: Wake) -> io::Result<()> {
        match wake {
            Wake::Nobody => Ok(()),
            Wake::Writer => self.writers.post(1),
            Wake::Readers(n) => self.readers.post(n),
        }
    }

    fn try_write_step(&self, expired: bool) -> Step {
        self.transition(|s| match s.mode {
            Mode::Free | Mode::ReservedForWriter => {
                s.mode = Mode::OwnedByWriter;
                Step::Acquired
            }
            _ if expired => Step::Expired,
            Mode::OwnedByWriter => {
                s.waiting_writers += 1;
                Step::Wait
            }
            Mode::OwnedByReaders | Mode::OwnedByReadersAndWriterPending => {
                s.mode = Mode::OwnedByReadersAndWriterPending;
                s.waiting_writers += 1;
                Step::Wait
            }
        })
    }

    /// Also returns the admission generation the reader queued under.
    fn try_read_step(&self, expired: bool) -> (Step, u32) {
        self.transition(|s| {
            let step = match s.mode {
                Mode::Free => {
                    s.mode = Mode::OwnedByReaders;
                    s.active_readers = 1;
                    Step::Acquired
                }
                Mode::OwnedByReaders => {
                    s.active_readers += 1;
                    Step::Acquired
                }
                _ if expired => Step::Expired,
                Mode::OwnedByWriter
                | Mode::OwnedByReadersAndWriterPending
                | Mode::ReservedForWriter => {
                    s.waiting_readers += 1;
                    Step::Wait
                }
            };
            (step, s.admissions)
        })
    }

    /// Take a timed-out reader queued under generation `queued_at` off the
    /// queue. Returns `false` if it was admitted in the meantime, in which
    /// case it already counts as active and its permit is posted.
    fn withdraw_reader(&self, queued_at: u32) -> bool {
        self.transition(|s| {
            if s.admissions != queued_at {
                return false;
            }
            debug_assert!(s.waiting_readers > 0, "queued reader missing from the count");
            s.waiting_readers = s.waiting_readers.saturating_sub(1);
            true
        })
    }

    /// Acquire the lock, blocking until it is available.
    ///
    /// `exclusive = true` takes it as the single writer, `false` as one of
    /// possibly many readers.
    pub fn enter(&self, exclusive: bool) -> io::Result<()> {
        if exclusive {
            while self.try_write_step(false) == Step::Wait {
                self.writers.wait()?;
            }
        } else if self.try_read_step(false).0 == Step::Wait {
            // The releasing writer counted us into the readers already.
            self.readers.wait()?;
        }
        Ok(())
    }

    /// Acquire the lock, giving up after `timeout`.
    ///
    /// Returns `Ok(true)` once acquired, `Ok(false)` on timeout. A waiter that
    /// times out removes itself from the state word; if a releaser has already
    /// handed it the lock the acquisition completes instead.
    pub fn enter_timeout(&self, exclusive: bool, timeout: Duration) -> io::Result<bool> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.enter(exclusive).map(|()| true);
        };
        if exclusive {
            self.write_until(deadline)
        } else {
            self.read_until(deadline)
        }
    }

    fn write_until(&self, deadline: Instant) -> io::Result<bool> {
        loop {
            match self.try_write_step(Instant::now() >= deadline) {
                Step::Acquired => return Ok(true),
                Step::Expired => return Ok(false),
                Step::Wait => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.writers.wait_timeout(remaining)? {
                continue;
            }
            let withdrawn = self.transition(|s| {
                if s.waiting_writers == 0 {
                    return None;
                }
                s.waiting_writers -= 1;
                if s.waiting_writers == 0 && s.mode == Mode::OwnedByReadersAndWriterPending {
                    // Readers queued only because of us.
                    return Some(s.admit_waiting_readers());
                }
                Some(Wake::Nobody)
            });
            match withdrawn {
                Some(wake) => {
                    self.wake(wake)?;
                    return Ok(false);
                }
                // A writer permit is already on its way; take it and retry.
                None => self.writers.wait()?,
            }
        }
    }

    fn read_until(&self, deadline: Instant) -> io::Result<bool> {
        let queued_at = match self.try_read_step(Instant::now() >= deadline) {
            (Step::Acquired, _) => return Ok(true),
            (Step::Expired, _) => return Ok(false),
            (Step::Wait, generation) => generation,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.readers.wait_timeout(remaining)? {
            return Ok(true);
        }
        if self.withdraw_reader(queued_at) {
            return Ok(false);
        }
        // Admitted just as we timed out; the permit is posted or about to be.
        self.readers.wait()?;
        Ok(true)
    }

    /// Release the lock taken by the matching `enter`.
    ///
    /// Whether the caller is the writer or a reader follows from the mode:
    /// only the writer can be inside while it is `OwnedByWriter`. Calling this
    /// without holding the lock is a usage error.
    pub fn leave(&self) -> io::Result<()> {
        let wake = self.transition(|s| match s.mode {
            Mode::OwnedByWriter => s.done_writing(),
            Mode::OwnedByReaders | Mode::OwnedByReadersAndWriterPending => s.done_reading(),
            Mode::Free | Mode::ReservedForWriter => {
                debug_assert!(false, "ReaderWriterLock::leave without enter ({:?})", s.mode);
                Wake::Nobody
            }
        });
        self.wake(wake)
    }

    /// Acquire shared access for the lifetime of the returned guard.
    pub fn read(&self) -> io::Result<ReadGuard<'_>> {
        self.enter(false)?;
        Ok(ReadGuard { lock: self })
    }

    /// Acquire exclusive access for the lifetime of the returned guard.
    pub fn write(&self) -> io::Result<WriteGuard<'_>> {
        self.enter(true)?;
        Ok(WriteGuard { lock: self })
    }

    /// Current decoded state. Stale as soon as it is returned.
    pub fn state(&self) -> LockState {
        LockState::unpack(self.word.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for ReaderWriterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderWriterLock")
            .field("state", &self.state())
            .finish()
    }
}

fn release(lock: &ReaderWriterLock) {
    if let Err(e) = lock.leave() {
        tracing::error!(error = %e, "failed to wake reader/writer lock waiters");
    }
}

/// RAII shared access to a [`ReaderWriterLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a ReaderWriterLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        release(self.lock);
    }
}

/// RAII exclusive access to a [`ReaderWriterLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReaderWriterLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        release(self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mode: Mode, active: u32, wr: u32, ww: u32) -> LockState {
        LockState {
            mode,
            active_readers: active,
            waiting_readers: wr,
            waiting_writers: ww,
            admissions: 0,
        }
    }

    #[test]
    fn pack_layout() {
        assert_eq!(state(Mode::Free, 0, 0, 0).pack(), 0);
        assert_eq!(state(Mode::OwnedByReaders, 1, 0, 0).pack(), 0x2 | 0x8);
        assert_eq!(state(Mode::OwnedByWriter, 0, 1, 0).pack(), 0x1 | 0x1000);
        assert_eq!(
            state(Mode::OwnedByReadersAndWriterPending, 0, 0, 1).pack(),
            0x3 | 0x20_0000
        );

        let mut full = state(Mode::ReservedForWriter, MAX_COUNT, MAX_COUNT, MAX_COUNT);
        full.admissions = u32::MAX;
        assert_eq!(LockState::unpack(full.pack()), full);
        assert_eq!((full.pack() >> 30) & 0x3, 0, "bits 30..=31 stay clear");
        assert_eq!(full.pack() >> 32, u64::from(u32::MAX));
    }

    #[test]
    fn writer_release_prefers_writers() {
        let mut s = state(Mode::OwnedByWriter, 0, 3, 2);
        assert_eq!(s.done_writing(), Wake::Writer);
        assert_eq!(s, state(Mode::ReservedForWriter, 0, 3, 1));
    }

    #[test]
    fn writer_release_admits_all_readers() {
        let mut s = state(Mode::OwnedByWriter, 0, 4, 0);
        assert_eq!(s.done_writing(), Wake::Readers(4));
        let mut expected = state(Mode::OwnedByReaders, 4, 0, 0);
        expected.admissions = 1;
        assert_eq!(s, expected);
    }

    #[test]
    fn writer_release_without_waiters_frees() {
        let mut s = state(Mode::OwnedByWriter, 0, 0, 0);
        assert_eq!(s.done_writing(), Wake::Nobody);
        assert_eq!(s.mode, Mode::Free);
    }

    #[test]
    fn last_reader_hands_to_pending_writer() {
        let mut s = state(Mode::OwnedByReadersAndWriterPending, 2, 1, 1);
        assert_eq!(s.done_reading(), Wake::Nobody);
        assert_eq!(s, state(Mode::OwnedByReadersAndWriterPending, 1, 1, 1));

        assert_eq!(s.done_reading(), Wake::Writer);
        assert_eq!(s, state(Mode::ReservedForWriter, 0, 1, 0));
    }

    #[test]
    fn last_reader_frees() {
        let mut s = state(Mode::OwnedByReaders, 1, 0, 0);
        assert_eq!(s.done_reading(), Wake::Nobody);
        assert_eq!(s, state(Mode::Free, 0, 0, 0));
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        let lock = ReaderWriterLock::new().unwrap();
        lock.enter(false).unwrap();
        assert_eq!(lock.try_write_step(false), Step::Wait);
        assert_eq!(lock.state(), state(Mode::OwnedByReadersAndWriterPending, 1, 0, 1));

        assert_eq!(lock.try_read_step(false), (Step::Wait, 0));
        assert_eq!(lock.state(), state(Mode::OwnedByReadersAndWriterPending, 1, 1, 1));
    }

    #[test]
    fn expired_attempt_leaves_state_untouched() {
        let lock = ReaderWriterLock::new().unwrap();
        lock.enter(true).unwrap();
        assert_eq!(lock.try_write_step(true), Step::Expired);
        assert_eq!(lock.try_read_step(true).0, Step::Expired);
        assert_eq!(lock.state(), state(Mode::OwnedByWriter, 0, 0, 0));
        lock.leave().unwrap();
        assert_eq!(lock.state().mode, Mode::Free);
    }

    #[test]
    fn admitted_reader_cannot_withdraw_a_later_readers_place() {
        let lock = ReaderWriterLock::new().unwrap();
        lock.enter(true).unwrap();

        // An early reader queues behind the writer.
        let (step, early) = lock.try_read_step(false);
        assert_eq!(step, Step::Wait);

        // The writer leaves and admits it; its permit is posted.
        lock.leave().unwrap();
        assert_eq!(lock.state().active_readers, 1);

        // Before it picks the permit up, a writer and a later reader queue.
        assert_eq!(lock.try_write_step(false), Step::Wait);
        let (step, late) = lock.try_read_step(false);
        assert_eq!(step, Step::Wait);
        assert_ne!(early, late);

        // The early reader times out: it was admitted, so it must not take
        // the later reader's place in the queue.
        assert!(!lock.withdraw_reader(early));
        assert!(lock.readers.try_wait().unwrap());
        let s = lock.state();
        assert_eq!(s.mode, Mode::OwnedByReadersAndWriterPending);
        assert_eq!((s.active_readers, s.waiting_readers, s.waiting_writers), (1, 1, 1));
        assert!(!lock.readers.try_wait().unwrap(), "no stray permit for the later reader");

        // The later reader can still withdraw; the writer goes next.
        assert!(lock.withdraw_reader(late));
        lock.leave().unwrap();
        assert_eq!(lock.state().mode, Mode::ReservedForWriter);
    }
}

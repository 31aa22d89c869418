// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the single-flight coalescing executor.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use commsync::{CoalescingExecutor, Job, ThreadScheduler};

/// Route `tracing` output through the test harness so it is captured per test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wait_idle(exec: &CoalescingExecutor) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !exec.is_idle() {
        assert!(Instant::now() < deadline, "executor never went idle: {exec:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start: Instant,
    end: Instant,
    value: u64,
}

#[test]
fn single_trigger_runs_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let exec = {
        let count = Arc::clone(&count);
        CoalescingExecutor::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };

    exec.trigger().expect("trigger");
    wait_idle(&exec);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(exec.runs(), 1);
}

#[test]
fn burst_is_coalesced_and_eventually_consistent() {
    let value = Arc::new(AtomicU64::new(0));
    let log = Arc::new(Mutex::new(Vec::<Run>::new()));

    let exec = Arc::new({
        let value = Arc::clone(&value);
        let log = Arc::clone(&log);
        CoalescingExecutor::new(move || {
            let start = Instant::now();
            let seen = value.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            log.lock().unwrap().push(Run {
                start,
                end: Instant::now(),
                value: seen,
            });
        })
    });

    let threads = 10;
    let per_thread = 5;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let exec = Arc::clone(&exec);
            let value = Arc::clone(&value);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    value.fetch_add(1, Ordering::SeqCst);
                    exec.trigger().expect("trigger");
                    thread::sleep(Duration::from_millis(3));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    wait_idle(&exec);

    let log = log.lock().unwrap();
    let total = threads * per_thread;
    assert!(!log.is_empty());
    assert!(
        log.len() < total as usize / 2,
        "{} runs for {total} triggers",
        log.len()
    );
    assert_eq!(log.last().map(|r| r.value), Some(total));
    assert_eq!(exec.runs(), log.len() as u64);

    for pair in log.windows(2) {
        assert!(pair[0].end <= pair[1].start, "runs overlapped: {pair:?}");
    }
}

#[test]
fn trigger_during_run_is_not_lost() {
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));

    let exec = {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        let runs = Arc::clone(&runs);
        CoalescingExecutor::new(move || {
            started.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };

    exec.trigger().expect("trigger");
    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    // The first run is in flight; these must cause exactly one more run.
    exec.trigger().expect("trigger");
    exec.trigger().expect("trigger");
    assert!(exec.is_running());
    release.store(true, Ordering::SeqCst);

    wait_idle(&exec);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_action_does_not_wedge() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let exec = {
        let calls = Arc::clone(&calls);
        CoalescingExecutor::new(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated persistence failure");
            }
        })
    };

    exec.trigger().expect("trigger");
    wait_idle(&exec);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    exec.trigger().expect("trigger");
    wait_idle(&exec);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(exec.runs(), 2);
}

#[test]
fn custom_scheduler_receives_drains() {
    let scheduled = Arc::new(AtomicUsize::new(0));
    let scheduler = {
        let scheduled = Arc::clone(&scheduled);
        move |job: Job| -> io::Result<()> {
            scheduled.fetch_add(1, Ordering::SeqCst);
            thread::spawn(job);
            Ok(())
        }
    };
    let exec = CoalescingExecutor::with_scheduler(|| {}, scheduler);

    exec.trigger().expect("trigger");
    wait_idle(&exec);
    exec.trigger().expect("trigger");
    wait_idle(&exec);

    assert_eq!(scheduled.load(Ordering::SeqCst), 2);
    assert_eq!(exec.runs(), 2);
}

#[test]
fn failed_schedule_is_retried_by_next_trigger() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let scheduler = {
        let attempts = Arc::clone(&attempts);
        let threads = ThreadScheduler::new("coalesce-test");
        move |job: Job| -> io::Result<()> {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(io::Error::other("pool saturated"));
            }
            commsync::Scheduler::schedule(&threads, job)
        }
    };
    let ran = Arc::new(AtomicUsize::new(0));
    let exec = {
        let ran = Arc::clone(&ran);
        CoalescingExecutor::with_scheduler(
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            scheduler,
        )
    };

    let err = exec.trigger().unwrap_err();
    assert_eq!(err.to_string(), "pool saturated");
    assert!(!exec.is_running());
    assert_eq!(exec.pending(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    exec.trigger().expect("trigger");
    wait_idle(&exec);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

//! Checkpointed preemption under a single permit.
//!
//! The nominal targets (a small task lands within `max_timeslice` plus one
//! checkpoint gap plus handoff) are asserted with generous CI margins; the
//! point of each assertion is the order of magnitude, not the exact figure.

use crate::support::{burn_cpu, checksum_block, make_block};
use coopsched::Scheduler;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A long checkpointed checksum job is preempted so a small plain task
/// submitted mid-run completes almost immediately, and the long job still
/// finishes intact.
#[test]
fn small_task_lands_during_long_checkpointed_job() {
    let sched = Scheduler::with_defaults(1, Duration::from_millis(10));
    let block = Arc::new(make_block(1));

    let sum = Arc::new(AtomicU64::new(0));
    let long_job = {
        let block = Arc::clone(&block);
        let sum = Arc::clone(&sum);
        sched.submit_checkpointed(move |cp| {
            for _ in 0..3_000 {
                sum.fetch_add(checksum_block(&block), Ordering::Relaxed);
                cp.check();
            }
        })
    };

    // Let the long job get going before racing it.
    std::thread::sleep(Duration::from_millis(20));
    assert!(!long_job.is_done(), "long job finished implausibly fast");

    let small_start = Instant::now();
    let small = {
        let block = Arc::clone(&block);
        sched.submit(move || {
            for _ in 0..10 {
                checksum_block(&block);
            }
        })
    };
    small.sync();
    let small_latency = small_start.elapsed();

    // Nominal bound: max_timeslice (10 ms) + one checkpoint gap + handoff.
    assert!(
        small_latency < Duration::from_millis(100),
        "small task took {:?}; preemption is not working",
        small_latency
    );

    long_job.sync();
    assert_ne!(sum.load(Ordering::Relaxed), 0);
}

/// A ~microsecond task behind a CPU hog returns within a couple of
/// timeslices, not after the hog's full runtime.
#[test]
fn tiny_task_latency_is_bounded_by_the_timeslice() {
    let sched = Scheduler::with_defaults(1, Duration::from_millis(1));

    let hog = sched.submit_checkpointed(|cp| {
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            burn_cpu(Duration::from_micros(50));
            cp.check();
        }
    });
    std::thread::sleep(Duration::from_millis(10));

    let start = Instant::now();
    let tiny = sched.submit(|| {
        std::hint::black_box(1 + 1);
    });
    tiny.sync();
    let latency = start.elapsed();

    // Nominal bound: max_timeslice + ~1 ms.
    assert!(
        latency < Duration::from_millis(50),
        "tiny task took {:?} behind a checkpointed hog",
        latency
    );
    hog.sync();
}

/// Without checkpoints there is nothing to preempt: a waiting task runs
/// only after the uncooperative one finishes. This is the documented limit
/// of cooperative scheduling, not a failure.
#[test]
fn uncooperative_task_cannot_be_preempted() {
    let sched = Scheduler::with_defaults(1, Duration::from_millis(1));

    let first_done = Arc::new(std::sync::Mutex::new(None::<Instant>));
    let second_start = Arc::new(std::sync::Mutex::new(None::<Instant>));

    let first = {
        let first_done = Arc::clone(&first_done);
        sched.submit(move || {
            burn_cpu(Duration::from_millis(40));
            *first_done.lock().unwrap() = Some(Instant::now());
        })
    };
    std::thread::sleep(Duration::from_millis(5));
    let second = {
        let second_start = Arc::clone(&second_start);
        sched.submit(move || {
            *second_start.lock().unwrap() = Some(Instant::now());
        })
    };

    first.sync();
    second.sync();

    let done = first_done.lock().unwrap().expect("first recorded");
    let started = second_start.lock().unwrap().expect("second recorded");
    assert!(
        started >= done,
        "second task ran before the uncooperative task released its permit"
    );

    // The scheduler did ask; the request just had nowhere to land until
    // the closure ended.
    assert!(sched.stats().preemptions_signalled >= 1);
}

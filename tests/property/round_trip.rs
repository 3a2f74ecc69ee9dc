//! Submission round-trips: everything submitted completes, with the
//! results and orderings the scheduler promises.
//!
//! Each proptest case spins up a real scheduler with real threads, so the
//! case counts are kept deliberately low.

use coopsched::{Scheduler, SubmitOptions, TaskFn};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// K pure tasks computing distinct values: every handle syncs and the
    /// result set is exactly the expected set.
    #[test]
    fn all_plain_results_arrive(
        values in prop::collection::hash_set(0u64..10_000, 1..40),
        permits in 1usize..4,
    ) {
        let sched = Scheduler::with_defaults(permits, Duration::from_millis(1));
        let results = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = values
            .iter()
            .map(|&v| {
                let results = Arc::clone(&results);
                sched.submit(move || {
                    results.lock().unwrap().insert(v.wrapping_mul(v));
                })
            })
            .collect();
        for h in handles {
            h.sync();
        }

        let expected: HashSet<u64> = values.iter().map(|v| v.wrapping_mul(*v)).collect();
        let got = results.lock().unwrap().clone();
        prop_assert_eq!(got, expected);
    }

    /// Equal-score EI submissions dispatch FIFO for any task count, on a
    /// single permit.
    #[test]
    fn ei_hint_order_is_submission_order(count in 1usize..40) {
        let sched = Scheduler::with_defaults(1, Duration::from_millis(1));
        let order = Arc::new(Mutex::new(Vec::with_capacity(count)));

        let handles: Vec<_> = (0..count)
            .map(|i| {
                let order = Arc::clone(&order);
                sched.submit_with(
                    TaskFn::Plain(Box::new(move || {
                        order.lock().unwrap().push(i);
                    })),
                    SubmitOptions { ei_hint: true, ..Default::default() },
                )
            })
            .collect();
        for h in handles {
            h.sync();
        }

        let got = order.lock().unwrap().clone();
        let expected: Vec<usize> = (0..count).collect();
        prop_assert_eq!(got, expected);
    }

    /// Checkpoint polling with no pending yield is harmless at any
    /// frequency: the task runs to completion with nothing reordered.
    #[test]
    fn redundant_checkpoints_are_noops(checks in 0usize..5_000) {
        let sched = Scheduler::with_defaults(1, Duration::from_millis(100));
        let h = sched.submit_checkpointed(move |cp| {
            for _ in 0..checks {
                cp.check();
            }
        });
        h.sync();
        prop_assert!(h.is_done());
        // With a 100 ms slice and microseconds of work, the task should
        // never have been preempted into the suspended queues.
        let snap = sched.stats();
        prop_assert_eq!(snap.tasks_completed, 1);
    }

    /// Eventful tasks with arbitrary short waits always complete, and
    /// every bracketed wait is visible in the event-call counter.
    ///
    /// One permit, so each resume forces the previous event-call's permit
    /// through the scheduler before `sync` can return; the counter is
    /// exact, not racing the drain.
    #[test]
    fn eventful_waits_round_trip(
        waits in prop::collection::vec(1u64..800, 1..8),
    ) {
        let sched = Scheduler::with_defaults(1, Duration::from_millis(1));
        let expected = waits.len() as u64;
        let h = sched.submit_eventful(move |ev| {
            for &us in &waits {
                ev.call(|| std::thread::sleep(Duration::from_micros(us)));
            }
        });
        h.sync();
        prop_assert_eq!(sched.stats().event_call_returns, expected);
    }
}

//! Scheduler Instrumentation
//!
//! Cheap, always-on counters for scheduler observability.
//!
//! # Design
//!
//! - Counters are relaxed atomics updated from the scheduler loop and task
//!   threads; no reader ever blocks a writer.
//! - Hot words are `CachePadded` so the loop's dispatch counters don't
//!   false-share with task-side completion counters.
//! - `snapshot()` reads everything at once into a plain struct; consistency
//!   across counters is best-effort, which is all observability needs.
//!
//! The headline statistic is `max_handoff_ns`: the largest observed gap
//! between a task returning its permit and the scheduler loop consuming it.
//! Because preemption is cooperative, this is the number an operator watches
//! to decide whether checkpoint frequency is adequate.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared scheduler counters. One instance per scheduler, updated from the
/// loop thread and from task threads.
#[derive(Debug, Default)]
pub(crate) struct SchedStats {
    /// Largest observed permit handoff gap, in nanoseconds.
    max_handoff_ns: CachePadded<AtomicU64>,

    /// Dispatches by source.
    ei_dispatches: CachePadded<AtomicU64>,
    new_dispatches: AtomicU64,
    ci_dispatches: AtomicU64,

    /// Timeslice timers that fired and signalled a yield.
    preemptions_signalled: AtomicU64,

    /// Permits drained back from an in-flight event-call.
    event_call_returns: AtomicU64,

    /// Task lifecycle.
    tasks_submitted: CachePadded<AtomicU64>,
    tasks_completed: AtomicU64,
}

impl SchedStats {
    #[inline]
    pub(crate) fn record_handoff(&self, gap: Duration) {
        let ns = gap.as_nanos().min(u64::MAX as u128) as u64;
        self.max_handoff_ns.fetch_max(ns, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dispatch(&self, source: DispatchSource) {
        let counter = match source {
            DispatchSource::Ei => &*self.ei_dispatches,
            DispatchSource::New => &self.new_dispatches,
            DispatchSource::Ci => &self.ci_dispatches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_preemption_signalled(&self) {
        self.preemptions_signalled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event_call_return(&self) {
        self.event_call_returns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn max_handoff_delay(&self) -> Duration {
        Duration::from_nanos(self.max_handoff_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            max_handoff_delay: self.max_handoff_delay(),
            ei_dispatches: self.ei_dispatches.load(Ordering::Relaxed),
            new_dispatches: self.new_dispatches.load(Ordering::Relaxed),
            ci_dispatches: self.ci_dispatches.load(Ordering::Relaxed),
            preemptions_signalled: self.preemptions_signalled.load(Ordering::Relaxed),
            event_call_returns: self.event_call_returns.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
        }
    }
}

/// Which runnable source a dispatch came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DispatchSource {
    /// Popped from the event-intensive priority heap.
    Ei,
    /// Taken from the new-task queue (first run).
    New,
    /// Taken from the cpu-intensive queue.
    Ci,
}

/// Point-in-time view of scheduler counters.
///
/// Counters are read individually with relaxed ordering; the snapshot is not
/// a consistent cut, only a cheap one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Largest observed gap between permit release and scheduler pickup.
    pub max_handoff_delay: Duration,
    /// Dispatches from the EI heap.
    pub ei_dispatches: u64,
    /// First dispatches of never-run tasks.
    pub new_dispatches: u64,
    /// Dispatches from the cpu-intensive queue.
    pub ci_dispatches: u64,
    /// Timeslice expirations that set a yield flag.
    pub preemptions_signalled: u64,
    /// Permits returned from inside an event-call.
    pub event_call_returns: u64,
    /// Tasks accepted by `submit*`.
    pub tasks_submitted: u64,
    /// Tasks that reached END.
    pub tasks_completed: u64,
}

impl StatsSnapshot {
    /// Total dispatches across all sources.
    #[inline]
    pub fn dispatches(&self) -> u64 {
        self.ei_dispatches + self.new_dispatches + self.ci_dispatches
    }
}

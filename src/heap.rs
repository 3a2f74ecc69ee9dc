//! Event-Intensive Priority Heap
//!
//! Stable max-heap ordering the runnable event-intensive set. Entries are
//! keyed `(score desc, seq asc)`: a higher amplification score dispatches
//! first, and among equal scores the earlier-enqueued entry wins. The `seq`
//! tiebreaker is load-bearing: without it, equal-score tasks could starve
//! one another behind heap reordering.
//!
//! `seq` is assigned on push from a monotone counter. It is 64-bit and
//! bounded by lifetime submissions, so wraparound is not reachable in a
//! realistic run; the counter asserts against it anyway.
//!
//! Used only by the scheduler loop; no synchronization.

use crate::task::Task;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// One runnable event-intensive task plus its dispatch key.
#[derive(Debug)]
pub(crate) struct EiEntry {
    /// Amplification score from the classifier, `>= 0` and finite.
    pub(crate) score: f64,
    /// Push order; earlier entries win score ties.
    pub(crate) seq: u64,
    pub(crate) task: Arc<Task>,
}

impl PartialEq for EiEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EiEntry {}

impl PartialOrd for EiEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EiEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the maximum: order by score, then by *reversed*
        // seq so the smaller (earlier) sequence number compares greater.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduler-loop-owned heap over the runnable EI set.
#[derive(Debug, Default)]
pub(crate) struct EiHeap {
    heap: BinaryHeap<EiEntry>,
    /// Highest sequence number handed out so far.
    seq: u64,
}

impl EiHeap {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::with_capacity(128),
            seq: 0,
        }
    }

    /// Insert a task with its classifier score.
    ///
    /// # Panics
    /// Aborts on a negative or non-finite score, or on sequence-counter
    /// wraparound; both are scheduler bugs.
    pub(crate) fn push(&mut self, task: Arc<Task>, score: f64) {
        assert!(
            score.is_finite() && score >= 0.0,
            "EI score must be finite and >= 0, got {}",
            score
        );
        self.seq = self
            .seq
            .checked_add(1)
            .expect("EI heap sequence counter wrapped");
        self.heap.push(EiEntry {
            score,
            seq: self.seq,
            task,
        });
    }

    /// Remove and return the highest-priority entry.
    pub(crate) fn pop(&mut self) -> Option<EiEntry> {
        self.heap.pop()
    }

    /// Highest-priority entry without removing it.
    pub(crate) fn peek(&self) -> Option<&EiEntry> {
        self.heap.peek()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

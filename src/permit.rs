//! Permit Pool
//!
//! # Purpose
//!
//! Exactly `P` permits exist for the lifetime of a scheduler; holding one is
//! the right to run on one of the scheduler's logical slots. The pool is a
//! bounded channel constructed full. Tasks return permits on release; only
//! the scheduler loop consumes them.
//!
//! # Correctness Invariants
//!
//! - **Conservation**: permits are never created or destroyed after pool
//!   construction. At any instant each permit is in exactly one place:
//!   the pool channel, the loop's staged buffer, a task inbox, or held by a
//!   running task.
//! - **No overfill**: returning more permits than exist is a bug and aborts
//!   the process.
//! - **Handoff visibility**: every return is timestamped so the loop can
//!   measure how long a permit sat in the channel before being re-lent.
//!
//! # Two Halves
//!
//! The pool splits at construction into a [`PermitReturner`] (shared with
//! every task thread) and a [`PermitIntake`] (owned by the scheduler loop).
//! The split is what lets the loop observe shutdown: when the scheduler
//! handle and all tasks are gone, the returner side drops and the intake's
//! channel disconnects.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// The right to occupy one of the scheduler's `P` logical slots.
///
/// Carries its stable pool index, the timestamp of its latest return (for
/// handoff instrumentation), and a marker set while its former holder is
/// inside an event-call. The scheduler only ever asks whether an
/// event-call release happened (to count it), so the marker is a flag,
/// not a reference back to the parked task.
#[derive(Debug)]
pub(crate) struct Permit {
    idx: usize,
    released_at: Option<Instant>,
    event_call: bool,
}

impl Permit {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            released_at: None,
            event_call: false,
        }
    }

    /// Stable index in `0..P`.
    #[inline]
    pub(crate) fn idx(&self) -> usize {
        self.idx
    }

    /// Mark this permit as released by a task entering an event-call.
    pub(crate) fn begin_event_call(&mut self) {
        debug_assert!(
            !self.event_call,
            "permit {} already marked as an event-call release",
            self.idx
        );
        self.event_call = true;
    }

    /// Clear the event-call marker, reporting whether it was set.
    /// Called by the loop on drain.
    pub(crate) fn end_event_call(&mut self) -> bool {
        std::mem::take(&mut self.event_call)
    }

    /// Time this permit spent in the return channel, if it was returned by
    /// a task (permits lent straight from the initial fill carry no stamp).
    /// Clears the stamp.
    pub(crate) fn handoff_gap(&mut self, now: Instant) -> Option<Duration> {
        self.released_at
            .take()
            .map(|t| now.saturating_duration_since(t))
    }
}

/// Task-side half of the pool: returns permits.
///
/// Cloneable; one clone lives in the scheduler's shared state and is reached
/// by every task thread through its back-reference.
#[derive(Clone, Debug)]
pub(crate) struct PermitReturner {
    tx: Sender<Permit>,
    capacity: usize,
}

impl PermitReturner {
    /// Return a permit to the pool, stamping the release time.
    ///
    /// Never blocks: pool capacity equals the number of permits in
    /// existence. A full pool therefore means a permit was duplicated or
    /// fabricated; abort.
    pub(crate) fn put(&self, mut permit: Permit) {
        assert!(permit.idx < self.capacity, "foreign permit idx {}", permit.idx);
        permit.released_at = Some(Instant::now());
        self.tx
            .try_send(permit)
            .expect("permit pool overfilled: more releases than permits exist");
    }

    /// Number of permits in existence.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Loop-side half of the pool: consumes returned permits.
///
/// Exactly one intake is in use per scheduler (the loop's); clones exist
/// only so tests can probe pool depth from another thread.
#[derive(Clone, Debug)]
pub(crate) struct PermitIntake {
    rx: Receiver<Permit>,
}

impl PermitIntake {
    /// Non-blocking take. `None` means the channel is currently empty;
    /// disconnection is surfaced separately via [`PermitIntake::receiver`]
    /// select arms.
    pub(crate) fn try_take(&self) -> Option<Permit> {
        match self.rx.try_recv() {
            Ok(p) => Some(p),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Raw receiver for `select!` integration in the scheduler loop.
    #[inline]
    pub(crate) fn receiver(&self) -> &Receiver<Permit> {
        &self.rx
    }

    /// Permits currently sitting in the channel. Test-side probe for
    /// conservation assertions.
    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.rx.len()
    }
}

/// Forge a loose permit for abort-path tests. Never valid in production:
/// permits only come from [`new_pool`].
#[cfg(test)]
pub(crate) fn test_forge(idx: usize) -> Permit {
    Permit::new(idx)
}

/// Build a pool of `permits` permits, constructed full.
pub(crate) fn new_pool(permits: usize) -> (PermitReturner, PermitIntake) {
    assert!(permits > 0, "permit pool capacity must be > 0");
    let (tx, rx) = bounded(permits);
    for idx in 0..permits {
        // Initial fill carries no release stamp: nothing has handed these off.
        tx.try_send(Permit::new(idx))
            .expect("fresh pool rejected initial fill");
    }
    (
        PermitReturner {
            tx,
            capacity: permits,
        },
        PermitIntake { rx },
    )
}

//! Checkpoint & Event-Call Protocol
//!
//! # Overview
//!
//! The two cooperation handles a task can be given:
//!
//! - [`Checkpoint`]: a polling point. `check()` costs one atomic load when
//!   no preemption is pending; when the scheduler has requested a yield it
//!   releases the permit, reclassifies, and blocks until the scheduler
//!   lends a permit again.
//! - [`EventCall`]: a bracket for externally-waiting regions. `call(inner)`
//!   releases the permit *unconditionally*, runs `inner` on the current
//!   thread while other tasks use the freed slot, then reclassifies and
//!   blocks for a permit. `check()` is the degenerate no-inner form and
//!   behaves exactly like a checkpoint.
//!
//! # Contract
//!
//! Work inside `call(inner)` is expected to wait on I/O, timers, or
//! coordination, not to burn CPU. A CPU-heavy inner closure cannot corrupt
//! scheduler state (the permit accounting is unconditional) but it defeats
//! the fairness the permit cap exists to provide, and it inflates the
//! task's amplification score.
//!
//! # Release Discipline
//!
//! Every release path does the same four things, in order: stamp
//! `suspended_cpu_t`, clear the yield flag, repay the permit, reclassify
//! and re-enqueue. The flag clear means a preemption request that lands
//! after the stamp but before redispatch is absorbed; the scheduler
//! re-signals on the next slice if it still wants the permit back.

use crate::classifier::classify_and_requeue;
use crate::task::{Status, Task};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative preemption point handed to checkpointed closures.
pub struct Checkpoint {
    task: Arc<Task>,
}

impl Checkpoint {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    /// Poll for a pending preemption request.
    ///
    /// Hot path: a single atomic load, then straight back to user code.
    /// When a yield is pending this blocks until the scheduler redispatches
    /// the task, which may be considerably later if higher-priority work is
    /// runnable.
    #[inline]
    pub fn check(&self) {
        if self.task.yield_requested() {
            suspend_here(&self.task);
        }
    }
}

/// Event-call bracket handed to eventful closures.
pub struct EventCall {
    task: Arc<Task>,
}

impl EventCall {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    /// Release the permit for the duration of `inner`.
    ///
    /// `inner` runs on the task's own thread; the freed permit lets other
    /// tasks progress in parallel. On return the task is reclassified from
    /// the measured wait and blocks until a permit comes back.
    pub fn call<R>(&self, inner: impl FnOnce() -> R) -> R {
        let task = &self.task;

        {
            let mut timing = task.timing();
            let now = Instant::now();
            timing.enter_event_t = now;
            timing.suspended_cpu_t = now;
        }
        task.clear_yield();
        task.transition(Status::Running, Status::Suspended);

        let mut permit = task.take_permit();
        permit.begin_event_call();
        task.link().permits.put(permit);

        let result = inner();

        let event = {
            let mut timing = task.timing();
            timing.end_event_t = Instant::now();
            timing
                .end_event_t
                .saturating_duration_since(timing.enter_event_t)
        };

        classify_and_requeue(task, Some(event));
        let permit = task.await_permit();
        task.begin_slice(Status::Suspended, permit);

        result
    }

    /// The no-inner form: an ordinary checkpoint.
    #[inline]
    pub fn check(&self) {
        if self.task.yield_requested() {
            suspend_here(&self.task);
        }
    }
}

/// Shared slow path for a checkpoint that observed the yield flag.
fn suspend_here(task: &Arc<Task>) {
    task.timing().suspended_cpu_t = Instant::now();
    task.clear_yield();
    task.transition(Status::Running, Status::Suspended);

    let permit = task.take_permit();
    task.link().permits.put(permit);

    classify_and_requeue(task, None);

    let permit = task.await_permit();
    task.begin_slice(Status::Suspended, permit);
}

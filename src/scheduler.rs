//! Scheduler Loop & Public Surface
//!
//! # Architecture
//!
//! ```text
//!                       ┌───────────────────────────────────────────────────┐
//!                       │              scheduler loop thread                │
//!   submit ──new_q─────►│                                                   │
//!                       │   staged permits ──┐                              │
//!   task ────ei_q──────►│   EI heap ─────────┼──► dispatch: EI > NEW > CI   │
//!   releases            │   pending new/ci ──┘        │                     │
//!        └───ci_q──────►│                              ▼                    │
//!                       │   task_slots[idx] ◄── (task, resume_t)            │
//!   permit returns ────►│        │                                          │
//!                       │        └─► earliest deadline ──► timer ──► set    │
//!                       │                                          yield    │
//!                       └───────────────────────────────────────────────────┘
//! ```
//!
//! The loop is the sole mutator of the task-slot array, the EI heap, and
//! the staged permit buffer. Tasks talk to it only through the three
//! runnable channels, the permit channel, their single-slot inbox, and
//! their yield flag. Every piece of cross-thread state is a bounded
//! channel or one atomic word.
//!
//! # Each Iteration
//!
//! 1. Drain returned permits into the staged buffer, recording handoff
//!    delay and clearing the slot the permit's index names.
//! 2. Drain the EI channel into the priority heap.
//! 3. With a permit and a runnable task in hand: dispatch, priority
//!    **EI heap > new queue > CI queue**.
//! 4. Permits but nothing runnable: block on all four channels.
//! 5. Runnable tasks but no permit: block on the permit channel and the
//!    earliest timeslice deadline across occupied slots. When the timer
//!    wins, clear that slot and set the task's yield flag; the permit
//!    itself comes back whenever the task reaches a checkpoint. That lag
//!    is the cooperative-preemption limit, and `max_permit_handoff_delay`
//!    exists so operators can see it.
//!
//! # Shutdown
//!
//! There is no destroy call. The new-task channel's only sender lives in
//! the shared state, so it dies with the last `Scheduler` handle and is
//! simply retired from the wait set; tasks may well still be running at
//! that point. The EI, CI, and permit senders are cloned into every
//! task's link, so those channels disconnect only once the handle is
//! gone *and* the last task has finished. The loop exits when the permit
//! channel disconnects: nothing can be runnable and no permit can come
//! back after that.

use crate::config::SchedulerConfig;
use crate::heap::EiHeap;
use crate::permit::{new_pool, Permit, PermitIntake, PermitReturner};
use crate::stats::{DispatchSource, SchedStats, StatsSnapshot};
use crate::task::{run_task, Scored, SchedulerLink, Status, Task, TaskFn, TaskHandle};
use crossbeam_channel::{at, bounded, never, select, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Public surface
// ============================================================================

/// Submission options beyond the closure itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitOptions {
    /// Per-task slice limit. `None` or zero falls back to the scheduler's
    /// `max_timeslice`.
    pub max_timeslice: Option<Duration>,
    /// Seed the task as event-intensive: it enters the EI queue with score
    /// 1.0 instead of the new-task queue. Use for work known to be
    /// wait-dominated; the classifier takes over from the first release.
    pub ei_hint: bool,
}

/// A cooperative CPU-bound task scheduler.
///
/// Owns `P` execution permits and a dedicated loop thread that lends them
/// to submitted tasks. Cheap to share: clone the handle or wrap it in an
/// `Arc`, both work.
///
/// ```ignore
/// let sched = Scheduler::with_defaults(2, Duration::from_millis(1));
/// let handle = sched.submit_checkpointed(|cp| {
///     for block in blocks {
///         checksum(block);
///         cp.check();
///     }
/// });
/// handle.sync();
/// ```
#[derive(Clone, Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: SchedulerConfig,
    new_tx: Sender<Arc<Task>>,
    ei_tx: Sender<Scored>,
    ci_tx: Sender<Arc<Task>>,
    permits: PermitReturner,
    stats: Arc<SchedStats>,
    next_task_id: AtomicU64,
}

impl Scheduler {
    /// Build a scheduler and start its loop thread.
    ///
    /// # Panics
    ///
    /// Panics on an invalid configuration (see [`SchedulerConfig::validate`]).
    pub fn new(config: SchedulerConfig) -> Scheduler {
        config.validate();

        let cap = config.runnable_channel_capacity();
        let (new_tx, new_rx) = bounded(cap);
        let (ei_tx, ei_rx) = bounded(cap);
        let (ci_tx, ci_rx) = bounded(cap);
        let (permits, intake) = new_pool(config.permits);
        let stats = Arc::new(SchedStats::default());

        let loop_state = SchedulerLoop {
            config,
            stats: Arc::clone(&stats),
            intake,
            new_rx,
            ei_rx,
            ci_rx,
            heap: EiHeap::new(),
            staged_permits: Vec::with_capacity(config.permits),
            pending_new: None,
            pending_ci: None,
            task_slots: (0..config.permits).map(|_| None).collect(),
        };
        thread::Builder::new()
            .name("coopsched-scheduler".to_string())
            .spawn(move || loop_state.run())
            .expect("failed to spawn scheduler thread");

        Scheduler {
            shared: Arc::new(Shared {
                config,
                new_tx,
                ei_tx,
                ci_tx,
                permits,
                stats,
                next_task_id: AtomicU64::new(0),
            }),
        }
    }

    /// Build a scheduler with `permits` slots and the given global
    /// timeslice, defaults everywhere else.
    pub fn with_defaults(permits: usize, max_timeslice: Duration) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            permits,
            max_timeslice,
            ..SchedulerConfig::default()
        })
    }

    /// Submit a plain closure: runs start to finish, cooperating only by
    /// ending.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> TaskHandle {
        self.submit_with(TaskFn::Plain(Box::new(f)), SubmitOptions::default())
    }

    /// Submit a closure that polls a [`crate::Checkpoint`] between units of
    /// work so the scheduler can preempt it.
    pub fn submit_checkpointed(
        &self,
        f: impl FnOnce(&crate::Checkpoint) + Send + 'static,
    ) -> TaskHandle {
        self.submit_with(TaskFn::Checkpointed(Box::new(f)), SubmitOptions::default())
    }

    /// Submit a closure that brackets its non-CPU waits in an
    /// [`crate::EventCall`].
    pub fn submit_eventful(
        &self,
        f: impl FnOnce(&crate::EventCall) + Send + 'static,
    ) -> TaskHandle {
        self.submit_with(TaskFn::Eventful(Box::new(f)), SubmitOptions::default())
    }

    /// Full-control submission.
    ///
    /// Blocks while the target runnable channel is full; backpressure on
    /// submitters is bounded-channel semantics, not an error.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler loop has terminated, which cannot happen
    /// while any `Scheduler` handle exists; it indicates a scheduler bug.
    pub fn submit_with(&self, f: TaskFn, opts: SubmitOptions) -> TaskHandle {
        let shared = &self.shared;
        let slice = match opts.max_timeslice {
            Some(d) if d > Duration::ZERO => d,
            _ => shared.config.max_timeslice,
        };
        let id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(
            id,
            f,
            slice,
            SchedulerLink {
                ei_tx: shared.ei_tx.clone(),
                ci_tx: shared.ci_tx.clone(),
                permits: shared.permits.clone(),
                classifier: shared.config.classifier,
                stats: Arc::clone(&shared.stats),
            },
        );
        let handle = task.handle();
        shared.stats.record_submitted();

        if opts.ei_hint {
            shared
                .ei_tx
                .send(Scored { task, score: 1.0 })
                .expect("scheduler loop terminated");
        } else {
            shared
                .new_tx
                .send(task)
                .expect("scheduler loop terminated");
        }
        handle
    }

    /// Number of execution permits (`P`).
    pub fn max_p(&self) -> usize {
        self.shared.permits.capacity()
    }

    /// Largest observed gap between a task returning its permit and the
    /// loop consuming it. The operator-facing measure of checkpoint
    /// adequacy.
    pub fn max_permit_handoff_delay(&self) -> Duration {
        self.shared.stats.max_handoff_delay()
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

// ============================================================================
// Loop state
// ============================================================================

/// One occupied permit slot: which task holds the permit and when its
/// current slice began.
#[derive(Debug)]
struct SlotEntry {
    task: Arc<Task>,
    resume_t: Instant,
}

/// What woke the loop out of a blocking wait.
enum Wake {
    New(Arc<Task>),
    Ei(Scored),
    Ci(Arc<Task>),
    Permit(Permit),
    Deadline,
}

/// A channel the loop was selecting on has disconnected.
///
/// The runnable channels can die at different times (the new-task sender
/// lives only in the shared state, the EI/CI senders also in every task
/// link), so each one is retired individually. Only [`DeadChannel::Pool`]
/// is terminal.
enum DeadChannel {
    NewQ,
    EiQ,
    CiQ,
    /// The permit returner is gone: no scheduler handle, no live task.
    Pool,
}

struct SchedulerLoop {
    config: SchedulerConfig,
    stats: Arc<SchedStats>,

    intake: PermitIntake,
    new_rx: Receiver<Arc<Task>>,
    ei_rx: Receiver<Scored>,
    ci_rx: Receiver<Arc<Task>>,

    heap: EiHeap,
    /// Permits drained from the pool, ready to lend.
    staged_permits: Vec<Permit>,
    /// Tasks pulled out of a blocking wait, not yet dispatched.
    pending_new: Option<Arc<Task>>,
    pending_ci: Option<Arc<Task>>,
    /// Occupancy record per permit index; drives the timeslice timer.
    task_slots: Vec<Option<SlotEntry>>,
}

impl SchedulerLoop {
    fn run(mut self) {
        loop {
            self.drain_permits();
            self.drain_ei();

            let have_permit = !self.staged_permits.is_empty();
            let have_task = self.has_runnable();

            let alive = match (have_permit, have_task) {
                (true, true) => {
                    self.dispatch();
                    true
                }
                (true, false) | (false, false) => self.wait_for_work(),
                (false, true) => self.wait_for_permit_or_preempt(),
            };
            if !alive {
                return;
            }
        }
    }

    // ----- intake -----------------------------------------------------------

    /// Move every immediately-available permit into the staged buffer.
    fn drain_permits(&mut self) {
        while let Some(permit) = self.intake.try_take() {
            self.admit_permit(permit);
        }
    }

    /// Account for a returned permit and stage it.
    ///
    /// The permit's index names the slot its last holder occupied; clearing
    /// it here means the timeslice timer only ever targets tasks that are
    /// genuinely running.
    fn admit_permit(&mut self, mut permit: Permit) {
        let now = Instant::now();
        if let Some(gap) = permit.handoff_gap(now) {
            self.stats.record_handoff(gap);
        }
        if permit.end_event_call() {
            self.stats.record_event_call_return();
        }
        self.task_slots[permit.idx()] = None;
        self.staged_permits.push(permit);

        debug_assert!(
            self.staged_permits.len() + self.occupied_slots() <= self.config.permits,
            "permit accounting broken: staged {} + occupied {} > {}",
            self.staged_permits.len(),
            self.occupied_slots(),
            self.config.permits
        );
    }

    fn drain_ei(&mut self) {
        while let Ok(scored) = self.ei_rx.try_recv() {
            self.heap.push(scored.task, scored.score);
        }
    }

    fn occupied_slots(&self) -> usize {
        self.task_slots.iter().filter(|s| s.is_some()).count()
    }

    // ----- runnable selection ----------------------------------------------

    fn has_runnable(&self) -> bool {
        !self.heap.is_empty()
            || self.pending_new.is_some()
            || self.pending_ci.is_some()
            || !self.new_rx.is_empty()
            || !self.ci_rx.is_empty()
    }

    /// Pick the next task to run: EI heap, then new queue, then CI queue.
    fn next_runnable(&mut self) -> Option<(Arc<Task>, DispatchSource)> {
        if self.heap.peek().is_some() {
            let entry = self.heap.pop().expect("peeked heap entry vanished");
            return Some((entry.task, DispatchSource::Ei));
        }
        if let Some(task) = self.pending_new.take() {
            return Some((task, DispatchSource::New));
        }
        if let Ok(task) = self.new_rx.try_recv() {
            return Some((task, DispatchSource::New));
        }
        if let Some(task) = self.pending_ci.take() {
            return Some((task, DispatchSource::Ci));
        }
        if let Ok(task) = self.ci_rx.try_recv() {
            return Some((task, DispatchSource::Ci));
        }
        None
    }

    // ----- dispatch ---------------------------------------------------------

    /// Pair one staged permit with the highest-priority runnable task.
    fn dispatch(&mut self) {
        let (task, source) = self
            .next_runnable()
            .expect("dispatch called with nothing runnable");
        let permit = self
            .staged_permits
            .pop()
            .expect("dispatch called with no staged permit");
        let idx = permit.idx();
        assert!(
            self.task_slots[idx].is_none(),
            "slot {} already occupied at dispatch",
            idx
        );

        // Tighter caps for latency-sensitive and not-yet-classified work:
        // EI dispatches and first runs get short slices until the
        // classifier has data.
        if source == DispatchSource::Ei {
            task.narrow_max_timeslice(self.config.ei_slice_ceiling);
        }
        let fresh = task.status() == Status::New;
        if fresh {
            task.narrow_max_timeslice(self.config.new_task_slice_ceiling);
        }

        self.task_slots[idx] = Some(SlotEntry {
            task: Arc::clone(&task),
            resume_t: Instant::now(),
        });
        self.stats.record_dispatch(source);

        if fresh {
            let name = format!("coopsched-task-{}", task.id());
            thread::Builder::new()
                .name(name)
                .spawn(move || run_task(task, permit))
                .expect("failed to spawn task thread");
        } else {
            assert_eq!(
                task.status(),
                Status::Suspended,
                "resumed task {} is not suspended",
                task.id()
            );
            task.deliver_permit(permit);
        }
    }

    // ----- blocking waits ---------------------------------------------------

    /// Block until anything happens: a runnable task on any channel or a
    /// returned permit. Returns false once the permit channel has
    /// disconnected, which is the only terminal signal.
    ///
    /// A dead runnable channel is replaced with [`never`] so it stops
    /// waking the select. The new-task channel in particular dies as soon
    /// as the last `Scheduler` handle drops, while suspended tasks may
    /// still need permits redelivered; exiting on its disconnection would
    /// strand them mid-flight.
    ///
    /// The select resolves into a plain value first; the arms themselves
    /// must not touch loop state while the receivers are borrowed.
    fn wait_for_work(&mut self) -> bool {
        let woke = select! {
            recv(self.new_rx) -> msg => msg.map(Wake::New).map_err(|_| DeadChannel::NewQ),
            recv(self.ei_rx) -> msg => msg.map(Wake::Ei).map_err(|_| DeadChannel::EiQ),
            recv(self.ci_rx) -> msg => msg.map(Wake::Ci).map_err(|_| DeadChannel::CiQ),
            recv(self.intake.receiver()) -> msg => msg.map(Wake::Permit).map_err(|_| DeadChannel::Pool),
        };
        match woke {
            Ok(Wake::New(task)) => self.pending_new = Some(task),
            Ok(Wake::Ei(scored)) => self.heap.push(scored.task, scored.score),
            Ok(Wake::Ci(task)) => self.pending_ci = Some(task),
            Ok(Wake::Permit(permit)) => self.admit_permit(permit),
            Ok(Wake::Deadline) => unreachable!("no timer armed while waiting for work"),
            Err(DeadChannel::NewQ) => self.new_rx = never(),
            Err(DeadChannel::EiQ) => self.ei_rx = never(),
            Err(DeadChannel::CiQ) => self.ci_rx = never(),
            // The permit senders live in the shared state and in every
            // task link: disconnection means no handle, no live task, and
            // every permit already drained. Nothing is left to schedule.
            Err(DeadChannel::Pool) => return false,
        }
        true
    }

    /// Runnable tasks are waiting but no permit is free: block until a
    /// permit returns or the earliest timeslice deadline passes, whichever
    /// comes first. A fired deadline preempts exactly one slot.
    fn wait_for_permit_or_preempt(&mut self) -> bool {
        let deadline = self.next_deadline();
        let timer = match deadline {
            Some((when, _)) => at(when),
            // All permits are in flight to inboxes or being returned; no
            // occupied slot means nothing to preempt, just wait.
            None => never(),
        };

        let woke = select! {
            recv(self.intake.receiver()) -> msg => msg.map(Wake::Permit).map_err(|_| ()),
            recv(timer) -> _ => Ok(Wake::Deadline),
        };
        match woke {
            Ok(Wake::Permit(permit)) => self.admit_permit(permit),
            Ok(Wake::Deadline) => {
                let (_, idx) = deadline.expect("timer fired without a deadline");
                self.fire_timeslice(idx);
            }
            Ok(_) => unreachable!("unexpected wake source while waiting for a permit"),
            // Permit channel disconnected: terminal, same as in
            // `wait_for_work`. Cannot happen while anything is runnable,
            // since queued tasks keep their link's senders alive.
            Err(()) => return false,
        }
        true
    }

    /// Earliest `resume_t + effective_slice` across occupied slots.
    fn next_deadline(&self) -> Option<(Instant, usize)> {
        let mut best: Option<(Instant, usize)> = None;
        for (idx, slot) in self.task_slots.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let when = entry.resume_t + self.effective_slice(&entry.task);
            if best.map_or(true, |(b, _)| when < b) {
                best = Some((when, idx));
            }
        }
        best
    }

    /// The slice a task may still run: the smallest of its current limit,
    /// its submission-time limit, and the scheduler-wide limit.
    fn effective_slice(&self, task: &Task) -> Duration {
        task.max_timeslice()
            .min(task.init_max_timeslice())
            .min(self.config.max_timeslice)
    }

    /// A slice expired: clear the slot and ask its task to yield. The
    /// permit stays with the task until its next checkpoint; cooperative
    /// preemption cannot reclaim it by force.
    fn fire_timeslice(&mut self, idx: usize) {
        let entry = self.task_slots[idx]
            .take()
            .expect("timeslice fired on an empty slot");
        if entry.task.signal_yield() {
            self.stats.record_preemption_signalled();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

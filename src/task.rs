//! Task Record & Lifecycle
//!
//! # Overview
//!
//! A task is created on submission and is terminal once its closure
//! returns. Its life is a walk over four states:
//!
//! ```text
//!   NEW ──chosen, permit handed──► RUNNING ──closure returns──► END
//!                                    │  ▲
//!              checkpoint w/ yield,  │  │ permit redelivered
//!              or event-call entry   ▼  │ on the inbox
//!                                 SUSPENDED
//! ```
//!
//! The task record is shared between exactly two writers: the task's own
//! thread (status on resume/suspend, timing block, permit slot) and the
//! scheduler loop (yield flag, timeslice narrowing, inbox delivery). All
//! cross-thread state is a single atomic word or a bounded channel; the two
//! mutexes (`timing`, `permit_slot`) are only ever locked by the owning
//! task thread and are uncontended.
//!
//! # Correctness Invariants
//!
//! - A task holds at most one permit, stored in `permit_slot` while it runs.
//! - Status transitions are asserted; an illegal edge aborts the process.
//! - `done` is raised exactly once, on every exit path including panics:
//!   [`CompletionGuard`] runs on unwind and also repays a held permit, so a
//!   failing closure cannot leak pool capacity.
//! - Delivering a permit onto an occupied inbox aborts: the scheduler
//!   dispatched the same task twice.

use crate::config::ClassifierParams;
use crate::permit::{Permit, PermitReturner};
use crate::stats::SchedStats;
use crate::yield_point::{Checkpoint, EventCall};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ============================================================================
// Status
// ============================================================================

/// Task lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Status {
    New = 0,
    Running = 1,
    Suspended = 2,
    End = 3,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::New,
            1 => Status::Running,
            2 => Status::Suspended,
            3 => Status::End,
            _ => unreachable!("corrupt status byte {}", v),
        }
    }
}

// ============================================================================
// Closure shapes
// ============================================================================

/// The user closure, tagged by which scheduler services it needs.
///
/// Exactly one closure exists per task by construction; there is no
/// "several nullable slots" shape to validate.
pub enum TaskFn {
    /// Runs start to finish with no cooperation points.
    Plain(Box<dyn FnOnce() + Send + 'static>),
    /// Receives a [`Checkpoint`] and is expected to poll it periodically.
    Checkpointed(Box<dyn FnOnce(&Checkpoint) + Send + 'static>),
    /// Receives an [`EventCall`] for bracketing non-CPU waits (and may also
    /// use it as a plain checkpoint).
    Eventful(Box<dyn FnOnce(&EventCall) + Send + 'static>),
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskFn::Plain(_) => "Plain",
            TaskFn::Checkpointed(_) => "Checkpointed",
            TaskFn::Eventful(_) => "Eventful",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Timing block
// ============================================================================

/// Per-task classifier inputs, written only by the owning task thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TimingBlock {
    /// When the current (or latest) slice started.
    pub(crate) resume_cpu_t: Instant,
    /// When the task last released its permit.
    pub(crate) suspended_cpu_t: Instant,
    /// Event-call bracket timestamps.
    pub(crate) enter_event_t: Instant,
    pub(crate) end_event_t: Instant,
    /// Accumulated CPU time across slices since the last decay reset.
    pub(crate) sum_cpu: Duration,
    /// Accumulated event-wait time since the last decay reset.
    pub(crate) sum_event: Duration,
    /// Consecutive event-intensive classifications.
    pub(crate) ei_ct: u64,
    /// Last computed amplification score.
    pub(crate) ei_factor: f64,
}

impl TimingBlock {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            resume_cpu_t: now,
            suspended_cpu_t: now,
            enter_event_t: now,
            end_event_t: now,
            sum_cpu: Duration::ZERO,
            sum_event: Duration::ZERO,
            ei_ct: 0,
            ei_factor: 0.0,
        }
    }
}

// ============================================================================
// Done signal
// ============================================================================

/// One-shot completion broadcast. Any number of waiters may block in
/// [`DoneSignal::wait`]; `raise` wakes them all and every later wait
/// returns immediately.
#[derive(Debug, Default)]
pub(crate) struct DoneSignal {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl DoneSignal {
    pub(crate) fn raise(&self) {
        let mut raised = lock_or_recover(&self.raised);
        debug_assert!(!*raised, "done signal raised twice");
        *raised = true;
        drop(raised);
        self.cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut raised = self
            .raised
            .lock()
            .expect("done signal mutex poisoned");
        while !*raised {
            raised = self
                .cv
                .wait(raised)
                .expect("done signal condvar poisoned");
        }
    }

    pub(crate) fn is_raised(&self) -> bool {
        *self.raised.lock().expect("done signal mutex poisoned")
    }
}

/// Lock with poison recovery, for paths that must not double-panic
/// (guard drops during unwinding).
fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

// ============================================================================
// Scheduler link
// ============================================================================

/// The slice of scheduler state a task thread needs to release its permit
/// and put itself back on a runnable channel. Cloned from the scheduler's
/// shared state at submission.
#[derive(Clone, Debug)]
pub(crate) struct SchedulerLink {
    /// Event-intensive runnable channel (task plus score).
    pub(crate) ei_tx: Sender<Scored>,
    /// Cpu-intensive runnable channel.
    pub(crate) ci_tx: Sender<Arc<Task>>,
    /// Permit pool, return side.
    pub(crate) permits: PermitReturner,
    /// Classifier thresholds.
    pub(crate) classifier: ClassifierParams,
    pub(crate) stats: Arc<SchedStats>,
}

/// An EI-channel message: a runnable task and the score it earned.
#[derive(Debug)]
pub(crate) struct Scored {
    pub(crate) task: Arc<Task>,
    pub(crate) score: f64,
}

// ============================================================================
// Task
// ============================================================================

/// Per-submission record. Shared via `Arc` between the runnable channels,
/// the scheduler loop, and the task's own thread.
pub(crate) struct Task {
    id: u64,
    status: AtomicU8,
    /// Non-zero means the scheduler wants this task to suspend at its next
    /// checkpoint. Scheduler sets via CAS; the task clears it when it
    /// releases its permit.
    yield_flag: AtomicU32,

    /// Slice limit fixed at submission; always > 0.
    init_max_timeslice: Duration,
    /// Current slice limit in nanoseconds; narrowed by the scheduler on
    /// dispatch, reset to init by an event-intensive classification.
    max_timeslice_ns: AtomicU64,

    /// Single-slot permit delivery channel. Scheduler sends, task receives.
    inbox_tx: Sender<Permit>,
    inbox_rx: Receiver<Permit>,

    done: Arc<DoneSignal>,
    timing: Mutex<TimingBlock>,
    /// The permit this task currently holds, while RUNNING.
    permit_slot: Mutex<Option<Permit>>,
    /// Taken exactly once, by the task thread on first dispatch.
    closure: Mutex<Option<TaskFn>>,

    link: SchedulerLink,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("yield_flag", &self.yield_flag.load(Ordering::Relaxed))
            .field("init_max_timeslice", &self.init_max_timeslice)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Build a NEW task. `init_max_timeslice` must already be coerced to a
    /// positive value by the submitter.
    pub(crate) fn new(
        id: u64,
        f: TaskFn,
        init_max_timeslice: Duration,
        link: SchedulerLink,
    ) -> Arc<Task> {
        assert!(
            init_max_timeslice > Duration::ZERO,
            "init_max_timeslice must be > 0"
        );
        let (inbox_tx, inbox_rx) = bounded(1);
        Arc::new(Task {
            id,
            status: AtomicU8::new(Status::New as u8),
            yield_flag: AtomicU32::new(0),
            init_max_timeslice,
            max_timeslice_ns: AtomicU64::new(duration_to_ns(init_max_timeslice)),
            inbox_tx,
            inbox_rx,
            done: Arc::new(DoneSignal::default()),
            timing: Mutex::new(TimingBlock::new(Instant::now())),
            permit_slot: Mutex::new(None),
            closure: Mutex::new(Some(f)),
            link,
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move `from → to`, aborting if the task was in any other state.
    pub(crate) fn transition(&self, from: Status, to: Status) {
        let prev = self.status.swap(to as u8, Ordering::AcqRel);
        assert_eq!(
            prev, from as u8,
            "task {}: illegal transition {:?} -> {:?} (was {:?})",
            self.id,
            from,
            to,
            Status::from_u8(prev)
        );
    }

    // ----- yield flag -------------------------------------------------------

    /// Scheduler side: request cooperative suspension. Returns whether this
    /// call set the flag (false if a request was already pending).
    pub(crate) fn signal_yield(&self) -> bool {
        self.yield_flag
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Task side, checkpoint hot path: one atomic load.
    #[inline]
    pub(crate) fn yield_requested(&self) -> bool {
        self.yield_flag.load(Ordering::Acquire) != 0
    }

    /// Task side: acknowledge the request while releasing the permit.
    #[inline]
    pub(crate) fn clear_yield(&self) {
        self.yield_flag.store(0, Ordering::Release);
    }

    // ----- timeslice --------------------------------------------------------

    #[inline]
    pub(crate) fn init_max_timeslice(&self) -> Duration {
        self.init_max_timeslice
    }

    #[inline]
    pub(crate) fn max_timeslice(&self) -> Duration {
        Duration::from_nanos(self.max_timeslice_ns.load(Ordering::Relaxed))
    }

    /// Clamp the current slice limit to `ceiling` (scheduler, on dispatch).
    pub(crate) fn narrow_max_timeslice(&self, ceiling: Duration) {
        self.max_timeslice_ns
            .fetch_min(duration_to_ns(ceiling), Ordering::Relaxed);
    }

    /// Restore the submission-time slice limit (classifier, on an
    /// event-intensive classification).
    pub(crate) fn reset_max_timeslice(&self) {
        self.max_timeslice_ns
            .store(duration_to_ns(self.init_max_timeslice), Ordering::Relaxed);
    }

    // ----- permit plumbing --------------------------------------------------

    /// Scheduler side: hand a permit to a suspended task. The inbox holds
    /// one permit; a second delivery before the task consumed the first
    /// means the scheduler double-dispatched; abort.
    pub(crate) fn deliver_permit(&self, permit: Permit) {
        self.inbox_tx
            .try_send(permit)
            .unwrap_or_else(|_| panic!("task {}: inbox occupied or gone on delivery", self.id));
    }

    /// Task side: block until the scheduler redelivers a permit.
    pub(crate) fn await_permit(&self) -> Permit {
        self.inbox_rx
            .recv()
            .expect("task inbox disconnected while suspended")
    }

    /// Start a slice: stamp `resume_cpu_t`, stash the permit, go RUNNING.
    pub(crate) fn begin_slice(&self, from: Status, permit: Permit) {
        self.timing().resume_cpu_t = Instant::now();
        let prev = self.permit_slot.lock().expect("permit slot poisoned").replace(permit);
        assert!(prev.is_none(), "task {} already holds a permit", self.id);
        self.transition(from, Status::Running);
    }

    /// Take the held permit out for release.
    pub(crate) fn take_permit(&self) -> Permit {
        self.permit_slot
            .lock()
            .expect("permit slot poisoned")
            .take()
            .unwrap_or_else(|| panic!("task {} released a permit it does not hold", self.id))
    }

    // ----- misc accessors ---------------------------------------------------

    pub(crate) fn timing(&self) -> MutexGuard<'_, TimingBlock> {
        self.timing.lock().expect("timing block poisoned")
    }

    pub(crate) fn link(&self) -> &SchedulerLink {
        &self.link
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            done: Arc::clone(&self.done),
        }
    }
}

#[inline]
fn duration_to_ns(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

// ============================================================================
// Handle
// ============================================================================

/// External waiter's view of a submitted task.
///
/// Cloneable; every clone observes the same completion. Dropping all
/// handles does not cancel the task; there is no cancellation.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    done: Arc<DoneSignal>,
}

impl TaskHandle {
    /// Block until the task reaches its terminal state.
    ///
    /// Returns immediately if it already has. Blocks indefinitely
    /// otherwise; there are no deadlines on task completion.
    pub fn sync(&self) {
        self.done.wait();
    }

    /// Non-blocking completion probe.
    pub fn is_done(&self) -> bool {
        self.done.is_raised()
    }
}

// ============================================================================
// Task thread body
// ============================================================================

/// Runs the user closure on the task's dedicated thread.
///
/// The [`CompletionGuard`] is armed before the closure runs: whether the
/// closure returns or panics, the permit is repaid and `done` raised.
pub(crate) fn run_task(task: Arc<Task>, permit: Permit) {
    task.begin_slice(Status::New, permit);
    let _guard = CompletionGuard { task: &task };

    let f = task
        .closure
        .lock()
        .expect("closure slot poisoned")
        .take()
        .expect("task dispatched twice from NEW");

    match f {
        TaskFn::Plain(f) => f(),
        TaskFn::Checkpointed(f) => f(&Checkpoint::new(Arc::clone(&task))),
        TaskFn::Eventful(f) => f(&EventCall::new(Arc::clone(&task))),
    }
}

/// Runs on every exit path of the task thread, including unwinding.
struct CompletionGuard<'a> {
    task: &'a Arc<Task>,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        let task = self.task;

        // A panic inside an event-call inner closure unwinds with no permit
        // held (it was returned at event-call entry); a panic in plain CPU
        // code unwinds with the permit still in the slot. Repay iff held.
        // A pending yield request dies with the task.
        task.clear_yield();
        if let Some(permit) = lock_or_recover(&task.permit_slot).take() {
            task.link.permits.put(permit);
        }

        let prev = task.status.swap(Status::End as u8, Ordering::AcqRel);
        if !std::thread::panicking() {
            assert_eq!(
                prev,
                Status::Running as u8,
                "task {} finished from {:?}",
                task.id,
                Status::from_u8(prev)
            );
        }

        task.link.stats.record_completed();
        task.done.raise();
    }
}

// ============================================================================
// Test support
// ============================================================================

//! Scheduler Configuration
//!
//! # Overview
//!
//! All tunables for a scheduler instance live here: the permit count `P`,
//! the global timeslice, the per-source dispatch ceilings, and the
//! classifier thresholds. Defaults are the ones observable to callers:
//!
//! | Knob | Default | Effect |
//! |------|---------|--------|
//! | `permits` | `auto_permits()` | concurrent CPU-heavy slots |
//! | `max_timeslice` | 1 ms | global cap on one uninterrupted slice |
//! | `ei_slice_ceiling` | 100 µs | slice cap when dispatched as event-intensive |
//! | `new_task_slice_ceiling` | 200 µs | slice cap for a task's first dispatch |
//! | `channel_capacity_per_permit` | 128 | runnable-queue depth is `128 * P` |
//!
//! The classifier thresholds are deliberately exposed rather than buried as
//! magic numbers; see [`ClassifierParams`].
//!
//! # Validation
//!
//! `validate()` panics on nonsensical values. Scheduler construction always
//! validates; a misconfigured scheduler is a bug, not a recoverable error.

use std::time::Duration;

/// Default global timeslice when the caller passes none.
pub const DEFAULT_MAX_TIMESLICE: Duration = Duration::from_millis(1);

/// Slice ceiling applied when a task is dispatched from the EI heap.
pub const DEFAULT_EI_SLICE_CEILING: Duration = Duration::from_micros(100);

/// Slice ceiling applied to a task's very first dispatch.
pub const DEFAULT_NEW_TASK_SLICE_CEILING: Duration = Duration::from_micros(200);

/// Runnable channels hold up to this many tasks per permit.
pub const DEFAULT_CHANNEL_CAPACITY_PER_PERMIT: usize = 128;

/// Thresholds for the event-intensiveness classifier.
///
/// A task is scored after every permit release; the score is the ratio of
/// measured non-CPU waiting to measured CPU time ("amplification"). These
/// parameters bound when that ratio is trusted:
///
/// - a single CPU burst longer than `cpu_burst_cap` is visibly CPU-bound and
///   forces a zero score regardless of history;
/// - below `min_cpu_floor` of accumulated CPU there is too little signal to
///   call the task CPU-bound, so it scores 1.0;
/// - the ratio only counts when event time dominates CPU time by at least
///   `event_ratio_divisor`;
/// - once `decay_window` of CPU has accumulated, both sums reset so the
///   classification tracks recent behavior instead of lifetime totals;
/// - scores at or below `ei_score_epsilon` route to the CPU-intensive queue.
#[derive(Clone, Copy, Debug)]
pub struct ClassifierParams {
    /// A single CPU burst above this is conclusively CPU-bound.
    pub cpu_burst_cap: Duration,
    /// Below this much accumulated CPU, assume event-intensive.
    pub min_cpu_floor: Duration,
    /// Event time must exceed `sum_cpu * event_ratio_divisor` to score.
    pub event_ratio_divisor: u32,
    /// Reset the accumulated sums once `sum_cpu` passes this window.
    pub decay_window: Duration,
    /// Minimum score that still counts as event-intensive.
    pub ei_score_epsilon: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            cpu_burst_cap: Duration::from_millis(1),
            min_cpu_floor: Duration::from_micros(10),
            event_ratio_divisor: 8,
            decay_window: Duration::from_secs(1),
            ei_score_epsilon: 1e-4,
        }
    }
}

impl ClassifierParams {
    /// Validate parameters. Panics on invalid values.
    pub fn validate(&self) {
        assert!(
            self.cpu_burst_cap > Duration::ZERO,
            "cpu_burst_cap must be > 0"
        );
        assert!(
            self.event_ratio_divisor > 0,
            "event_ratio_divisor must be > 0"
        );
        assert!(
            self.decay_window > Duration::ZERO,
            "decay_window must be > 0"
        );
        assert!(
            self.ei_score_epsilon.is_finite() && self.ei_score_epsilon >= 0.0,
            "ei_score_epsilon must be finite and >= 0"
        );
    }
}

/// Scheduler configuration.
///
/// Construct with struct-update syntax from `Default`:
///
/// ```ignore
/// let cfg = SchedulerConfig {
///     permits: 2,
///     max_timeslice: Duration::from_millis(10),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Number of execution permits (`P`). Must be > 0.
    pub permits: usize,

    /// Global cap on how long a task may hold a permit before the
    /// scheduler requests preemption. The effective slice for a task is
    /// the minimum of this, the task's current limit, and its init limit.
    pub max_timeslice: Duration,

    /// Slice ceiling applied when dispatching from the EI heap.
    pub ei_slice_ceiling: Duration,

    /// Slice ceiling applied when dispatching a task that has never run.
    pub new_task_slice_ceiling: Duration,

    /// Runnable-channel depth per permit. Submitters block once a channel
    /// holds `channel_capacity_per_permit * permits` tasks.
    pub channel_capacity_per_permit: usize,

    /// Event-intensiveness classifier thresholds.
    pub classifier: ClassifierParams,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            permits: auto_permits(),
            max_timeslice: DEFAULT_MAX_TIMESLICE,
            ei_slice_ceiling: DEFAULT_EI_SLICE_CEILING,
            new_task_slice_ceiling: DEFAULT_NEW_TASK_SLICE_CEILING,
            channel_capacity_per_permit: DEFAULT_CHANNEL_CAPACITY_PER_PERMIT,
            classifier: ClassifierParams::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.permits > 0, "permits must be > 0");
        assert!(
            self.max_timeslice > Duration::ZERO,
            "max_timeslice must be > 0"
        );
        assert!(
            self.ei_slice_ceiling > Duration::ZERO,
            "ei_slice_ceiling must be > 0"
        );
        assert!(
            self.new_task_slice_ceiling > Duration::ZERO,
            "new_task_slice_ceiling must be > 0"
        );
        assert!(
            self.channel_capacity_per_permit > 0,
            "channel_capacity_per_permit must be > 0"
        );
        self.classifier.validate();
    }

    /// Depth of each runnable channel.
    #[inline]
    pub fn runnable_channel_capacity(&self) -> usize {
        self.channel_capacity_per_permit * self.permits
    }
}

/// Permit count sized from hardware parallelism.
///
/// Leaves headroom for latency-sensitive threads (I/O loops, RPC handlers)
/// that share the process:
///
/// | hardware threads `n` | permits |
/// |----------------------|---------|
/// | ≤ 2 | 1 |
/// | 3–5 | n − 1 |
/// | 6–7 | n − 2 |
/// | ≥ 8 | n − n/4 |
pub fn auto_permits() -> usize {
    let n = num_cpus();
    if n <= 2 {
        1
    } else if n <= 5 {
        n - 1
    } else if n <= 7 {
        n - 2
    } else {
        n - n / 4
    }
}

/// Hardware parallelism, defaulting to 1 when undeterminable.
fn num_cpus() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            eprintln!(
                "WARN: Could not determine CPU count ({}), defaulting to 1",
                e
            );
            1
        }
    }
}

//! Timing Classifier
//!
//! # Purpose
//!
//! Detects tasks that spend most of their real time waiting on non-CPU
//! activity and promotes them so they run as soon as a permit frees up.
//! The score is an amplification ratio: observed event-wait time per unit
//! of observed CPU time. A sleep-heavy RPC loop scores in the hundreds; a
//! checksum loop scores zero.
//!
//! # Decision Procedure
//!
//! Run at every permit release (checkpoint yield or event-call exit),
//! after folding the just-finished burst into the running sums:
//!
//! ```text
//! 1. burst > cpu_burst_cap           → 0      (visibly CPU-bound burst)
//! 2. sum_cpu < min_cpu_floor         → 1.0    (too little CPU to judge)
//! 3. sum_cpu < sum_event / divisor   → sum_event / max(sum_cpu, 1ns)
//!       and once sum_cpu > decay_window, forget both sums
//! 4. otherwise                       → 0
//! ```
//!
//! Scores above `ei_score_epsilon` route the task to the event-intensive
//! channel (and restore its submission-time slice limit); everything else
//! routes to the cpu-intensive channel and forgets the classification
//! history, so a task that stops waiting re-earns its promotion from
//! scratch.
//!
//! The decay reset in rule 3 bounds the window: a task that has banked an
//! enormous `sum_event` cannot coast on it forever once it turns CPU-bound.

use crate::config::ClassifierParams;
use crate::task::{Scored, Task, TimingBlock};
use std::sync::Arc;
use std::time::Duration;

/// Fold the just-finished burst (and event wait, if any) into the task's
/// sums and compute the amplification score. `event` is `None` for a
/// checkpoint release.
pub(crate) fn classify(
    params: &ClassifierParams,
    timing: &mut TimingBlock,
    event: Option<Duration>,
) -> f64 {
    let burst = timing
        .suspended_cpu_t
        .saturating_duration_since(timing.resume_cpu_t);
    timing.sum_cpu += burst;
    if let Some(ev) = event {
        timing.sum_event += ev;
    }

    let factor = amplification(params, timing, burst);
    timing.ei_factor = factor;
    factor
}

fn amplification(params: &ClassifierParams, timing: &mut TimingBlock, burst: Duration) -> f64 {
    if burst > params.cpu_burst_cap {
        return 0.0;
    }
    if timing.sum_cpu < params.min_cpu_floor {
        return 1.0;
    }
    if timing.sum_cpu < timing.sum_event / params.event_ratio_divisor {
        let cpu_ns = timing.sum_cpu.as_nanos().max(1) as f64;
        let score = timing.sum_event.as_nanos() as f64 / cpu_ns;
        if timing.sum_cpu > params.decay_window {
            timing.sum_cpu = Duration::ZERO;
            timing.sum_event = Duration::ZERO;
        }
        return score;
    }
    0.0
}

/// Classify the task after a release and put it back on a runnable channel.
///
/// Called on the task's own thread, with the permit already repaid. The
/// task blocks on its inbox immediately after, so the scheduler may
/// redispatch it the moment this send lands.
pub(crate) fn classify_and_requeue(task: &Arc<Task>, event: Option<Duration>) {
    let params = task.link().classifier;

    let score = {
        let mut timing = task.timing();
        let score = classify(&params, &mut timing, event);
        if score > params.ei_score_epsilon {
            timing.ei_ct += 1;
        } else {
            timing.ei_ct = 0;
            timing.sum_cpu = Duration::ZERO;
            timing.sum_event = Duration::ZERO;
        }
        score
    };

    if score > params.ei_score_epsilon {
        task.reset_max_timeslice();
        task.link()
            .ei_tx
            .send(Scored {
                task: Arc::clone(task),
                score,
            })
            .expect("scheduler loop terminated with task outstanding");
    } else {
        task.link()
            .ci_tx
            .send(Arc::clone(task))
            .expect("scheduler loop terminated with task outstanding");
    }
}

//! Cooperative CPU-bound task scheduler.
//!
//! Multiplexes a fixed pool of `P` execution permits across an unbounded
//! stream of submitted closures, so long-running CPU work cannot starve
//! latency-sensitive work in the same process. Suspension is cooperative:
//! CPU-heavy closures poll a [`Checkpoint`], wait-heavy closures bracket
//! their waits in an [`EventCall`], and the scheduler uses those points to
//! bound how long any task holds a permit.
//!
//! Core pieces:
//! - A permit pool of exactly `P` reusable permits; tasks run only while
//!   holding one.
//! - A timing classifier that scores each task's event-wait-to-CPU
//!   amplification after every release; wait-dominated tasks dispatch
//!   through a stable max-heap ahead of everything else.
//! - A single scheduler loop that pairs permits with runnable tasks
//!   (EI heap > new queue > CPU queue), arms one timer for the earliest
//!   timeslice deadline, and sets a yield flag when it fires.
//!
//! ```text
//! submit ─► new_q ──┐
//!                   ├─► scheduler loop ─► permit + task ─► task thread
//! release ─► ei_q ──┤         ▲                               │
//!        └─► ci_q ──┘         └──── permit returned ◄─────────┘
//! ```
//!
//! ```ignore
//! use coopsched::Scheduler;
//! use std::time::Duration;
//!
//! let sched = Scheduler::with_defaults(2, Duration::from_millis(1));
//!
//! // CPU-heavy, cooperates via checkpoints:
//! let big = sched.submit_checkpointed(|cp| {
//!     for block in blocks {
//!         checksum(block);
//!         cp.check();
//!     }
//! });
//!
//! // Wait-heavy, lends its permit out during the wait:
//! let chatty = sched.submit_eventful(|ev| {
//!     for _ in 0..10 {
//!         ev.call(|| wait_for_reply());
//!     }
//! });
//!
//! big.sync();
//! chatty.sync();
//! ```
//!
//! Preemption is cooperative, not guaranteed: a closure that never
//! checkpoints keeps its permit until it finishes. The scheduler exposes
//! [`Scheduler::max_permit_handoff_delay`] so that gap is measurable.

pub mod config;
pub mod global;
pub mod rng;

mod classifier;
mod heap;
mod permit;
mod scheduler;
mod stats;
mod task;
mod yield_point;

pub use config::{auto_permits, ClassifierParams, SchedulerConfig};
pub use global::{global, install_global, GlobalInstallError};
pub use scheduler::{Scheduler, SubmitOptions};
pub use stats::StatsSnapshot;
pub use task::{TaskFn, TaskHandle};
pub use yield_point::{Checkpoint, EventCall};

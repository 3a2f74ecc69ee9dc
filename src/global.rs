//! Process-Wide Default Scheduler
//!
//! Explicit construction and injection is the preferred way to use
//! [`Scheduler`]; this module exists for callers that want one shared,
//! lazily-built instance per process without threading a handle through
//! every call site.
//!
//! The default instance is auto-sized (`auto_permits()`, default
//! timeslice). Installation is first-wins and idempotent under racing
//! callers: either the explicit [`install_global`] runs first and its
//! configuration sticks, or somebody already forced the default and the
//! installer is told so. Nothing is ever torn down; the instance lives
//! until process exit.

use crate::config::SchedulerConfig;
use crate::scheduler::Scheduler;
use crate::task::TaskHandle;
use crate::yield_point::{Checkpoint, EventCall};
use std::fmt;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// The process-wide scheduler, building it with defaults on first use.
pub fn global() -> &'static Scheduler {
    GLOBAL.get_or_init(|| Scheduler::new(SchedulerConfig::default()))
}

/// Install the process-wide scheduler with an explicit configuration.
///
/// Fails if an instance already exists, including the implicit default a
/// prior [`global`] call created. Losing installers get an error rather
/// than a silent swap, so a misordered init shows up in tests instead of
/// as mystery sizing in production.
pub fn install_global(config: SchedulerConfig) -> Result<(), GlobalInstallError> {
    let mut installed_here = false;
    GLOBAL.get_or_init(|| {
        installed_here = true;
        Scheduler::new(config)
    });
    if installed_here {
        Ok(())
    } else {
        Err(GlobalInstallError::AlreadyInstalled)
    }
}

/// Submit a plain closure to the process-wide scheduler.
pub fn submit(f: impl FnOnce() + Send + 'static) -> TaskHandle {
    global().submit(f)
}

/// Submit a checkpointed closure to the process-wide scheduler.
pub fn submit_checkpointed(f: impl FnOnce(&Checkpoint) + Send + 'static) -> TaskHandle {
    global().submit_checkpointed(f)
}

/// Submit an eventful closure to the process-wide scheduler.
pub fn submit_eventful(f: impl FnOnce(&EventCall) + Send + 'static) -> TaskHandle {
    global().submit_eventful(f)
}

/// Installation refused because an instance already exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalInstallError {
    AlreadyInstalled,
}

impl fmt::Display for GlobalInstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalInstallError::AlreadyInstalled => {
                f.write_str("a process-wide scheduler is already installed")
            }
        }
    }
}

impl std::error::Error for GlobalInstallError {}

//! # Supervisor App Capability Set
//!
//! The interface between the supervisor core and the per-app objects it
//! supervises.
//!
//! The supervisor never manipulates processes directly; it owns one
//! [`App`] per installed application and drives it through this trait.
//! The app object encapsulates its configured processes, applies
//! per-process fault policy, and reports the coarse app state back.  The
//! supervisor reacts to state transitions, most importantly the
//! transition to [`AppState::Stopped`], which is always observed
//! asynchronously through the child-signal path.
//!
//! Concrete implementations live outside the core: the daemon carries an
//! exec-backed one, and the test suites use scripted mocks.

pub mod policy;
pub mod state;

pub use policy::{FaultAction, Priority, WatchdogAction};
pub use state::{AppState, ProcState};

use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::io::RawFd;
use std::path::Path;
use sup_common::{AppName, ProcName, Result};

/// Opaque handle to a single process inside an app.
///
/// Handles are issued by the app object.  A configured process keeps the
/// same handle for as long as the app object lives, which is what lets
/// the broker detect a second client referencing the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcId(u64);

impl ProcId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// Handler fired when a client-created process stops; receives the
/// process's exit code.
pub type ProcStopHandler = Box<dyn FnMut(i32)>;

/// One installed application, as seen by the supervisor.
///
/// Start and stop are initiated synchronously, but an app only reaches
/// [`AppState::Stopped`] once all of its processes have been reaped, so
/// callers must re-check [`App::state`] after every `stop` and after
/// every [`App::sig_child`].
pub trait App {
    /// The app's installed name.
    fn name(&self) -> &AppName;

    /// Coarse app state.
    fn state(&self) -> AppState;

    /// Starts the app's configured processes.
    fn start(&mut self) -> Result<()>;

    /// Initiates an app stop.  Completion is observed through the
    /// child-signal path, not through this call.
    fn stop(&mut self);

    /// State of one configured process.
    fn proc_state(&self, proc_name: &ProcName) -> ProcState;

    /// True if the given PID is one of this app's top-level processes.
    fn has_top_level_proc(&self, pid: Pid) -> bool;

    /// Tells the app that one of its processes changed state, and
    /// returns the fault action the supervisor should take.
    ///
    /// Process-level recovery (restarting a single process) is handled
    /// inside the app; only app-level actions bubble up.
    fn sig_child(&mut self, pid: Pid, status: WaitStatus) -> FaultAction;

    /// Offers a watchdog timeout to this app.
    ///
    /// Returns None when the timed-out process does not belong to this
    /// app, otherwise the action the supervisor should apply.
    fn watchdog_timeout(&mut self, proc_id: u32) -> Option<WatchdogAction>;

    // Client-created process control.

    /// Creates a process object, either wrapping a configured process
    /// (by name) or an ad-hoc executable.  At least one of the two must
    /// be given.
    fn create_proc(
        &mut self,
        proc_name: Option<&ProcName>,
        exec_path: Option<&Path>,
    ) -> Result<ProcId>;

    /// Deletes a process object previously created with `create_proc`.
    /// Configured processes revert to their configured parameters.
    fn delete_proc(&mut self, proc: ProcId);

    /// Starts one process.  The app itself must already be running.
    fn start_proc(&mut self, proc: ProcId) -> Result<()>;

    /// Attaches the process's standard input.  None reverts to the
    /// default (`/dev/null`).
    fn set_proc_stdin(&mut self, proc: ProcId, fd: Option<RawFd>);

    /// Attaches the process's standard output.  None reverts to the
    /// default (the framework log).
    fn set_proc_stdout(&mut self, proc: ProcId, fd: Option<RawFd>);

    /// Attaches the process's standard error.  None reverts to the
    /// default (the framework log).
    fn set_proc_stderr(&mut self, proc: ProcId, fd: Option<RawFd>);

    /// Appends a command-line argument, overriding the configured list.
    /// An empty argument finalises an intentionally empty list.
    fn add_proc_arg(&mut self, proc: ProcId, arg: &str) -> Result<()>;

    /// Reverts to the configured argument list.
    fn clear_proc_args(&mut self, proc: ProcId);

    /// Overrides the process's priority; None reverts to configured.
    fn set_proc_priority(&mut self, proc: ProcId, priority: Option<Priority>) -> Result<()>;

    /// Overrides the process's fault action; None reverts to configured.
    fn set_proc_fault_action(&mut self, proc: ProcId, action: Option<FaultAction>);

    /// Installs or clears the process's stop handler.  At most one
    /// handler exists per process.
    fn set_proc_stop_handler(&mut self, proc: ProcId, handler: Option<ProcStopHandler>);
}

/// Builds app objects for the supervisor's containers.
pub trait AppFactory {
    /// Creates the app object for an installed app.
    ///
    /// `config_path` is the app's node in the configuration store.
    fn create_app(&mut self, name: &AppName, config_path: &str) -> Result<Box<dyn App>>;
}

//! Exec-backed application objects for the daemon.
//!
//! The supervisor core treats apps as a capability set; this module is
//! the daemon's concrete implementation of it.  Each app owns the
//! processes configured under its `procs` node:
//!
//! ```yaml
//! apps:
//!   audioService:
//!     startManual: false
//!     procs:
//!       audiod:
//!         exec: /usr/bin/audiod
//!         args: ["--daemon"]
//!         faultAction: restartApp
//!         watchdogAction: restartApp
//! ```
//!
//! Every spawned process becomes its own process group leader so a stop
//! can take its descendants down with it.  The app reaches the stopped
//! state only once the supervisor has reaped the last of its top-level
//! processes.

use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use sup_app::{
    App, AppFactory, AppState, FaultAction, Priority, ProcId, ProcState, ProcStopHandler,
    WatchdogAction,
};
use sup_common::limits::MAX_PATH_BYTES;
use sup_common::{AppName, Error, ProcName, Result};
use sup_config::ConfigStore;
use tracing::{debug, error, info, warn};

/// One process slot inside a host app.
struct HostProc {
    name: String,
    /// Came from the `procs` config node (as opposed to being created
    /// ad hoc by a client).
    configured: bool,
    exec: Option<PathBuf>,
    config_args: Vec<String>,
    arg_override: Option<Vec<String>>,
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    stderr: Option<RawFd>,
    config_priority: Option<Priority>,
    priority_override: Option<Priority>,
    config_fault: FaultAction,
    fault_override: Option<FaultAction>,
    watchdog_action: WatchdogAction,
    stop_handler: Option<ProcStopHandler>,
    pid: Option<Pid>,
}

impl HostProc {
    fn fault_action(&self) -> FaultAction {
        self.fault_override.unwrap_or(self.config_fault)
    }

    fn priority(&self) -> Option<Priority> {
        self.priority_override.or(self.config_priority)
    }

    fn args(&self) -> &[String] {
        match &self.arg_override {
            Some(args) => args,
            None => &self.config_args,
        }
    }

    /// Drops every client override, reverting to configured behavior.
    fn clear_overrides(&mut self) {
        self.arg_override = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.priority_override = None;
        self.fault_override = None;
        self.stop_handler = None;
    }
}

pub struct HostApp {
    name: AppName,
    procs: BTreeMap<u64, HostProc>,
    next_id: u64,
}

impl HostApp {
    fn new(name: AppName, config: &ConfigStore, config_path: &str) -> Self {
        let mut app = Self {
            name,
            procs: BTreeMap::new(),
            next_id: 1,
        };

        let procs = config.read_txn(config_path).child("procs");

        for proc_name in procs.child_names() {
            let node = procs.child(&proc_name);

            let config_fault = node
                .get_string("faultAction")
                .and_then(|s| parse_policy(&app.name, &proc_name, "fault", s.parse()))
                .unwrap_or(FaultAction::Ignore);

            let watchdog_action = node
                .get_string("watchdogAction")
                .and_then(|s| parse_policy(&app.name, &proc_name, "watchdog", s.parse()))
                .unwrap_or(WatchdogAction::Ignore);

            let config_priority = node
                .get_string("priority")
                .and_then(|s| parse_policy(&app.name, &proc_name, "priority", s.parse()));

            let slot = HostProc {
                name: proc_name.clone(),
                configured: true,
                exec: node.get_string("exec").map(PathBuf::from),
                config_args: node.get_string_list("args"),
                arg_override: None,
                stdin: None,
                stdout: None,
                stderr: None,
                config_priority,
                priority_override: None,
                config_fault,
                fault_override: None,
                watchdog_action,
                stop_handler: None,
                pid: None,
            };

            let id = app.next_id;
            app.next_id += 1;
            app.procs.insert(id, slot);
        }

        app
    }

    fn proc_mut(&mut self, proc: ProcId) -> Result<&mut HostProc> {
        self.procs
            .get_mut(&proc.as_raw())
            .ok_or_else(|| Error::not_found(format!("{proc} in app")))
    }

    fn spawn(name: &AppName, slot: &mut HostProc) -> Result<()> {
        let exec = slot
            .exec
            .clone()
            .ok_or_else(|| Error::bad_parameter(format!(
                "process '{}' has no executable configured",
                slot.name
            )))?;

        let mut command = Command::new(&exec);
        command.args(slot.args());

        command.stdin(match slot.stdin.take() {
            Some(fd) => unsafe { Stdio::from_raw_fd(fd) },
            None => Stdio::null(),
        });
        if let Some(fd) = slot.stdout.take() {
            command.stdout(unsafe { Stdio::from_raw_fd(fd) });
        }
        if let Some(fd) = slot.stderr.take() {
            command.stderr(unsafe { Stdio::from_raw_fd(fd) });
        }

        let nice = slot.priority().and_then(|p| match p {
            Priority::Idle => Some(19),
            Priority::Low => Some(10),
            Priority::Medium => Some(0),
            Priority::High => Some(-10),
            Priority::Rt(_) => {
                warn!(
                    "Real-time priority for process '{}' is not supported here; \
                     starting at default priority.",
                    slot.name
                );
                None
            }
        });

        unsafe {
            command.pre_exec(move || {
                // Own process group, so the whole subtree can be
                // signalled through the group id.
                nix::libc::setsid();

                if let Some(nice) = nice {
                    nix::libc::setpriority(nix::libc::PRIO_PROCESS as _, 0, nice);
                }

                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            error!(
                "Could not start process '{}' of application '{}': {}.",
                slot.name, name, e
            );
            Error::fault(format!("cannot spawn '{}'", exec.display()))
        })?;

        slot.pid = Some(Pid::from_raw(child.id() as i32));

        debug!(
            "Started process '{}' of application '{}' (PID {}).",
            slot.name,
            name,
            child.id()
        );

        Ok(())
    }
}

impl App for HostApp {
    fn name(&self) -> &AppName {
        &self.name
    }

    fn state(&self) -> AppState {
        if self.procs.values().any(|p| p.pid.is_some()) {
            AppState::Running
        } else {
            AppState::Stopped
        }
    }

    fn start(&mut self) -> Result<()> {
        let name = self.name.clone();
        let ids: Vec<u64> = self
            .procs
            .iter()
            .filter(|(_, p)| p.configured && p.pid.is_none())
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            let slot = self.procs.get_mut(&id).unwrap_or_else(|| unreachable!());

            if let Err(e) = Self::spawn(&name, slot) {
                self.stop();
                return Err(e);
            }
        }

        info!("Application '{}' started.", self.name);

        Ok(())
    }

    fn stop(&mut self) {
        for slot in self.procs.values() {
            if let Some(pid) = slot.pid {
                if let Err(e) = killpg(pid, Signal::SIGKILL) {
                    error!(
                        "Could not kill process group of '{}' (PID {}): {}.",
                        slot.name, pid, e
                    );
                }
            }
        }
        // The app stays in the running state until the supervisor has
        // reaped the last top-level process.
    }

    fn proc_state(&self, proc_name: &ProcName) -> ProcState {
        let running = self
            .procs
            .values()
            .any(|p| p.configured && p.name == proc_name.as_str() && p.pid.is_some());

        if running {
            ProcState::Running
        } else {
            ProcState::Stopped
        }
    }

    fn has_top_level_proc(&self, pid: Pid) -> bool {
        self.procs.values().any(|p| p.pid == Some(pid))
    }

    fn sig_child(&mut self, pid: Pid, status: WaitStatus) -> FaultAction {
        let name = self.name.clone();

        let Some(slot) = self.procs.values_mut().find(|p| p.pid == Some(pid)) else {
            return FaultAction::Ignore;
        };

        slot.pid = None;

        let exit_code = match status {
            WaitStatus::Exited(_, code) => code,
            WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
            _ => 0,
        };

        if let Some(handler) = slot.stop_handler.as_mut() {
            handler(exit_code);
        }

        let normal_exit = matches!(status, WaitStatus::Exited(_, 0));
        if normal_exit {
            return FaultAction::Ignore;
        }

        warn!(
            "Process '{}' of application '{}' faulted (PID {}, {:?}).",
            slot.name, name, pid, status
        );

        match slot.fault_action() {
            FaultAction::RestartProc => {
                // Process-level recovery stays inside the app.
                if let Err(e) = Self::spawn(&name, slot) {
                    error!("Could not restart process '{}': {}.", slot.name, e);
                }
                FaultAction::Ignore
            }
            action => action,
        }
    }

    fn watchdog_timeout(&mut self, proc_id: u32) -> Option<WatchdogAction> {
        let pid = Pid::from_raw(proc_id as i32);

        self.procs
            .values()
            .find(|p| p.pid == Some(pid))
            .map(|p| p.watchdog_action)
    }

    fn create_proc(
        &mut self,
        proc_name: Option<&ProcName>,
        exec_path: Option<&Path>,
    ) -> Result<ProcId> {
        // A configured process keeps its slot (and id), so a second
        // client referencing it is detectable upstream.
        if let Some(proc_name) = proc_name {
            let existing = self
                .procs
                .iter_mut()
                .find(|(_, p)| p.configured && p.name == proc_name.as_str());

            if let Some((id, slot)) = existing {
                if slot.pid.is_some() {
                    return Err(Error::duplicate(format!(
                        "process '{proc_name}' is already running"
                    )));
                }

                if let Some(path) = exec_path {
                    slot.exec = Some(path.to_path_buf());
                }

                return Ok(ProcId::new(*id));
            }
        }

        let exec = exec_path.ok_or_else(|| {
            Error::bad_parameter(format!(
                "process '{}' is not configured and no executable was given",
                proc_name.map(ProcName::as_str).unwrap_or("unspecified")
            ))
        })?;

        if exec.as_os_str().len() > MAX_PATH_BYTES {
            return Err(Error::overflow("executable path is too long"));
        }

        let slot = HostProc {
            name: proc_name
                .map(|n| n.as_str().to_string())
                .unwrap_or_else(|| "unspecified".to_string()),
            configured: false,
            exec: Some(exec.to_path_buf()),
            config_args: Vec::new(),
            arg_override: None,
            stdin: None,
            stdout: None,
            stderr: None,
            config_priority: None,
            priority_override: None,
            config_fault: FaultAction::Ignore,
            fault_override: None,
            watchdog_action: WatchdogAction::Ignore,
            stop_handler: None,
            pid: None,
        };

        let id = self.next_id;
        self.next_id += 1;
        self.procs.insert(id, slot);

        Ok(ProcId::new(id))
    }

    fn delete_proc(&mut self, proc: ProcId) {
        let Some(slot) = self.procs.get_mut(&proc.as_raw()) else {
            return;
        };

        if slot.configured {
            // The process itself survives; only the client's overrides
            // are discarded.
            slot.clear_overrides();
            return;
        }

        if let Some(pid) = slot.pid {
            let _ = killpg(pid, Signal::SIGKILL);
        }

        self.procs.remove(&proc.as_raw());
    }

    fn start_proc(&mut self, proc: ProcId) -> Result<()> {
        let name = self.name.clone();
        let slot = self.proc_mut(proc)?;

        if slot.pid.is_some() {
            return Err(Error::duplicate(format!(
                "process '{}' is already running",
                slot.name
            )));
        }

        HostApp::spawn(&name, slot)
    }

    fn set_proc_stdin(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.stdin = fd;
        }
    }

    fn set_proc_stdout(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.stdout = fd;
        }
    }

    fn set_proc_stderr(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.stderr = fd;
        }
    }

    fn add_proc_arg(&mut self, proc: ProcId, arg: &str) -> Result<()> {
        if arg.len() > MAX_PATH_BYTES {
            return Err(Error::overflow("argument is too long"));
        }

        let slot = self.proc_mut(proc)?;
        let args = slot.arg_override.get_or_insert_with(Vec::new);

        // An empty argument just materialises the override list.
        if !arg.is_empty() {
            args.push(arg.to_string());
        }

        Ok(())
    }

    fn clear_proc_args(&mut self, proc: ProcId) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.arg_override = None;
        }
    }

    fn set_proc_priority(&mut self, proc: ProcId, priority: Option<Priority>) -> Result<()> {
        let slot = self.proc_mut(proc)?;
        slot.priority_override = priority;
        Ok(())
    }

    fn set_proc_fault_action(&mut self, proc: ProcId, action: Option<FaultAction>) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.fault_override = action;
        }
    }

    fn set_proc_stop_handler(&mut self, proc: ProcId, handler: Option<ProcStopHandler>) {
        if let Ok(slot) = self.proc_mut(proc) {
            slot.stop_handler = handler;
        }
    }
}

/// Builds [`HostApp`] objects from the configuration store.
pub struct HostAppFactory {
    config: Arc<ConfigStore>,
}

impl HostAppFactory {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl AppFactory for HostAppFactory {
    fn create_app(&mut self, name: &AppName, config_path: &str) -> Result<Box<dyn App>> {
        Ok(Box::new(HostApp::new(
            name.clone(),
            &self.config,
            config_path,
        )))
    }
}

fn parse_policy<T, E: std::fmt::Display>(
    app: &AppName,
    proc: &str,
    what: &str,
    parsed: std::result::Result<T, E>,
) -> Option<T> {
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                "Ignoring bad {} configuration for process '{}' of app '{}': {}.",
                what, proc, app, e
            );
            None
        }
    }
}

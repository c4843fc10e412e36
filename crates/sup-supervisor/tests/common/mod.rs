//! Scripted doubles for driving the supervisor hermetically.
//!
//! The supervisor core is single-threaded, so the doubles share state
//! through `Rc<RefCell<..>>` handles that the tests keep for
//! assertions.  An app's behavior is scripted through its
//! [`ScriptedAppState`]: whether stops complete synchronously, what
//! fault action a dying child produces, which watchdog events it
//! claims, and so on.

#![allow(dead_code)]

use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use sup_app::{
    App, AppFactory, AppState, FaultAction, Priority, ProcId, ProcState, ProcStopHandler,
    WatchdogAction,
};
use sup_common::{AppName, Error, ProcName, Result, SessionId};
use sup_config::ConfigStore;
use sup_seclabel::LabelReader;
use sup_supervisor::wait::ChildReaper;
use sup_supervisor::Supervisor;

pub fn name(s: &str) -> AppName {
    AppName::new(s).unwrap()
}

pub fn pname(s: &str) -> ProcName {
    ProcName::new(s).unwrap()
}

pub fn sid(n: u32) -> SessionId {
    SessionId::new(n)
}

/// One process slot of a scripted app.
pub struct ScriptedProc {
    pub name: String,
    pub configured: bool,
    pub exec: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub priority: Option<Priority>,
    pub fault_action: Option<FaultAction>,
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
    pub stop_handler_installed: bool,
    pub started: usize,
}

impl ScriptedProc {
    fn new(name: &str, configured: bool) -> Self {
        Self {
            name: name.to_string(),
            configured,
            exec: None,
            args: None,
            priority: None,
            fault_action: None,
            stdin: None,
            stdout: None,
            stderr: None,
            stop_handler_installed: false,
            started: 0,
        }
    }
}

/// Scripted behavior and observed history of one app.
pub struct ScriptedAppState {
    pub name: AppName,
    pub state: AppState,
    /// Live top-level PIDs; the app reads as stopped once empty.
    pub pids: Vec<i32>,
    pub start_count: usize,
    pub stop_count: usize,
    pub sig_child_count: usize,
    pub watchdog_count: usize,
    /// Fail the next and all further start attempts.
    pub fail_start: bool,
    /// Whether a stop request completes immediately (no children left
    /// to reap).
    pub stop_is_sync: bool,
    /// Action reported for an abnormally exiting child.
    pub fault_action: FaultAction,
    /// Action reported when this app claims a watchdog timeout.
    pub watchdog_action: WatchdogAction,
    /// Proc ids this app claims watchdog events for.
    pub watchdog_claims: Vec<u32>,
    pub procs: BTreeMap<u64, ScriptedProc>,
    pub configured: HashMap<String, u64>,
    pub deleted_procs: Vec<u64>,
    next_proc: u64,
}

impl ScriptedAppState {
    pub fn new(name: AppName) -> Self {
        Self {
            name,
            state: AppState::Stopped,
            pids: Vec::new(),
            start_count: 0,
            stop_count: 0,
            sig_child_count: 0,
            watchdog_count: 0,
            fail_start: false,
            stop_is_sync: true,
            fault_action: FaultAction::Ignore,
            watchdog_action: WatchdogAction::Ignore,
            watchdog_claims: Vec::new(),
            procs: BTreeMap::new(),
            configured: HashMap::new(),
            deleted_procs: Vec::new(),
            next_proc: 1,
        }
    }

    fn alloc_proc(&mut self, proc: ScriptedProc) -> u64 {
        let id = self.next_proc;
        self.next_proc += 1;
        self.procs.insert(id, proc);
        id
    }
}

/// Registers a configured process on a scripted app and returns its
/// stable id.
pub fn seed_configured_proc(app: &Rc<RefCell<ScriptedAppState>>, proc: &str) -> u64 {
    let mut state = app.borrow_mut();
    let id = state.alloc_proc(ScriptedProc::new(proc, true));
    state.configured.insert(proc.to_string(), id);
    id
}

/// App object handed to the supervisor; all behavior lives in the
/// shared scripted state.
pub struct SharedApp {
    name: AppName,
    state: Rc<RefCell<ScriptedAppState>>,
}

impl App for SharedApp {
    fn name(&self) -> &AppName {
        &self.name
    }

    fn state(&self) -> AppState {
        self.state.borrow().state
    }

    fn start(&mut self) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.start_count += 1;

        if s.fail_start {
            return Err(Error::fault("scripted start failure"));
        }

        s.state = AppState::Running;
        Ok(())
    }

    fn stop(&mut self) {
        let mut s = self.state.borrow_mut();
        s.stop_count += 1;

        if s.stop_is_sync {
            s.pids.clear();
            s.state = AppState::Stopped;
        }
    }

    fn proc_state(&self, proc_name: &ProcName) -> ProcState {
        let s = self.state.borrow();

        if s.state == AppState::Running && s.configured.contains_key(proc_name.as_str()) {
            ProcState::Running
        } else {
            ProcState::Stopped
        }
    }

    fn has_top_level_proc(&self, pid: Pid) -> bool {
        self.state.borrow().pids.contains(&pid.as_raw())
    }

    fn sig_child(&mut self, pid: Pid, status: WaitStatus) -> FaultAction {
        let mut s = self.state.borrow_mut();
        s.sig_child_count += 1;

        if let Some(pos) = s.pids.iter().position(|&p| p == pid.as_raw()) {
            s.pids.remove(pos);
        }

        if s.pids.is_empty() {
            s.state = AppState::Stopped;
        }

        if matches!(status, WaitStatus::Exited(_, 0)) {
            FaultAction::Ignore
        } else {
            s.fault_action
        }
    }

    fn watchdog_timeout(&mut self, proc_id: u32) -> Option<WatchdogAction> {
        let mut s = self.state.borrow_mut();

        if s.watchdog_claims.contains(&proc_id) {
            s.watchdog_count += 1;
            Some(s.watchdog_action)
        } else {
            None
        }
    }

    fn create_proc(
        &mut self,
        proc_name: Option<&ProcName>,
        exec_path: Option<&Path>,
    ) -> Result<ProcId> {
        let mut s = self.state.borrow_mut();

        if let Some(proc_name) = proc_name {
            if let Some(&id) = s.configured.get(proc_name.as_str()) {
                if let Some(path) = exec_path {
                    s.procs.get_mut(&id).unwrap().exec = Some(path.to_path_buf());
                }
                return Ok(ProcId::new(id));
            }
        }

        let exec = exec_path.ok_or_else(|| Error::bad_parameter("no executable"))?;

        let mut proc = ScriptedProc::new(
            proc_name.map(ProcName::as_str).unwrap_or("unspecified"),
            false,
        );
        proc.exec = Some(exec.to_path_buf());

        Ok(ProcId::new(s.alloc_proc(proc)))
    }

    fn delete_proc(&mut self, proc: ProcId) {
        let mut s = self.state.borrow_mut();
        s.deleted_procs.push(proc.as_raw());

        let configured = s
            .procs
            .get(&proc.as_raw())
            .map(|p| p.configured)
            .unwrap_or(false);

        if configured {
            let slot = s.procs.get_mut(&proc.as_raw()).unwrap();
            slot.args = None;
            slot.priority = None;
            slot.fault_action = None;
            slot.stdin = None;
            slot.stdout = None;
            slot.stderr = None;
            slot.stop_handler_installed = false;
        } else {
            s.procs.remove(&proc.as_raw());
        }
    }

    fn start_proc(&mut self, proc: ProcId) -> Result<()> {
        let mut s = self.state.borrow_mut();

        let slot = s
            .procs
            .get_mut(&proc.as_raw())
            .ok_or_else(|| Error::not_found("proc"))?;

        slot.started += 1;
        Ok(())
    }

    fn set_proc_stdin(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.stdin = fd;
        }
    }

    fn set_proc_stdout(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.stdout = fd;
        }
    }

    fn set_proc_stderr(&mut self, proc: ProcId, fd: Option<RawFd>) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.stderr = fd;
        }
    }

    fn add_proc_arg(&mut self, proc: ProcId, arg: &str) -> Result<()> {
        if arg.len() > 511 {
            return Err(Error::overflow("argument too long"));
        }

        let mut s = self.state.borrow_mut();
        let slot = s
            .procs
            .get_mut(&proc.as_raw())
            .ok_or_else(|| Error::not_found("proc"))?;

        let args = slot.args.get_or_insert_with(Vec::new);
        if !arg.is_empty() {
            args.push(arg.to_string());
        }

        Ok(())
    }

    fn clear_proc_args(&mut self, proc: ProcId) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.args = None;
        }
    }

    fn set_proc_priority(&mut self, proc: ProcId, priority: Option<Priority>) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let slot = s
            .procs
            .get_mut(&proc.as_raw())
            .ok_or_else(|| Error::not_found("proc"))?;

        slot.priority = priority;
        Ok(())
    }

    fn set_proc_fault_action(&mut self, proc: ProcId, action: Option<FaultAction>) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.fault_action = action;
        }
    }

    fn set_proc_stop_handler(&mut self, proc: ProcId, handler: Option<ProcStopHandler>) {
        if let Some(slot) = self.state.borrow_mut().procs.get_mut(&proc.as_raw()) {
            slot.stop_handler_installed = handler.is_some();
        }
    }
}

type AppTable = Rc<RefCell<HashMap<String, Rc<RefCell<ScriptedAppState>>>>>;

struct MockFactory {
    apps: AppTable,
    fail_create: Rc<RefCell<HashSet<String>>>,
}

impl AppFactory for MockFactory {
    fn create_app(&mut self, name: &AppName, _config_path: &str) -> Result<Box<dyn App>> {
        if self.fail_create.borrow().contains(name.as_str()) {
            return Err(Error::fault("scripted create failure"));
        }

        let state = self
            .apps
            .borrow_mut()
            .entry(name.as_str().to_string())
            .or_insert_with(|| Rc::new(RefCell::new(ScriptedAppState::new(name.clone()))))
            .clone();

        Ok(Box::new(SharedApp {
            name: name.clone(),
            state,
        }))
    }
}

struct MockLabels {
    labels: Rc<RefCell<HashMap<i32, String>>>,
    fail: Rc<RefCell<HashSet<i32>>>,
}

impl LabelReader for MockLabels {
    fn proc_label(&self, pid: Pid) -> Result<String> {
        if self.fail.borrow().contains(&pid.as_raw()) {
            return Err(Error::fault("scripted label read failure"));
        }

        Ok(self
            .labels
            .borrow()
            .get(&pid.as_raw())
            .cloned()
            .unwrap_or_else(|| "framework".to_string()))
    }
}

struct MockReaper {
    reaped: Rc<RefCell<Vec<i32>>>,
    statuses: Rc<RefCell<HashMap<i32, WaitStatus>>>,
}

impl ChildReaper for MockReaper {
    fn reap(&mut self, pid: Pid) -> io::Result<WaitStatus> {
        self.reaped.borrow_mut().push(pid.as_raw());

        Ok(self
            .statuses
            .borrow_mut()
            .remove(&pid.as_raw())
            .unwrap_or(WaitStatus::Exited(pid, 0)))
    }
}

/// A supervisor over scripted apps, plus handles to everything the
/// tests need to script or inspect.
pub struct Fixture {
    pub supervisor: Supervisor,
    apps: AppTable,
    fail_create: Rc<RefCell<HashSet<String>>>,
    labels: Rc<RefCell<HashMap<i32, String>>>,
    label_failures: Rc<RefCell<HashSet<i32>>>,
    pub reaped: Rc<RefCell<Vec<i32>>>,
    statuses: Rc<RefCell<HashMap<i32, WaitStatus>>>,
}

impl Fixture {
    pub fn new(config_yaml: &str) -> Self {
        Self::with_install_dir(config_yaml, std::env::temp_dir())
    }

    pub fn with_install_dir(config_yaml: &str, install_dir: PathBuf) -> Self {
        let config = Arc::new(ConfigStore::from_yaml_str(config_yaml).unwrap());

        let apps: AppTable = Rc::new(RefCell::new(HashMap::new()));
        let fail_create = Rc::new(RefCell::new(HashSet::new()));
        let labels = Rc::new(RefCell::new(HashMap::new()));
        let label_failures = Rc::new(RefCell::new(HashSet::new()));
        let reaped = Rc::new(RefCell::new(Vec::new()));
        let statuses = Rc::new(RefCell::new(HashMap::new()));

        let supervisor = Supervisor::new(
            config,
            install_dir,
            Box::new(MockFactory {
                apps: Rc::clone(&apps),
                fail_create: Rc::clone(&fail_create),
            }),
            Box::new(MockLabels {
                labels: Rc::clone(&labels),
                fail: Rc::clone(&label_failures),
            }),
            Box::new(MockReaper {
                reaped: Rc::clone(&reaped),
                statuses: Rc::clone(&statuses),
            }),
        );

        Self {
            supervisor,
            apps,
            fail_create,
            labels,
            label_failures,
            reaped,
            statuses,
        }
    }

    /// The scripted state of an app, created on demand so behavior can
    /// be scripted before the app is ever launched.
    pub fn app(&self, app: &str) -> Rc<RefCell<ScriptedAppState>> {
        self.apps
            .borrow_mut()
            .entry(app.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(ScriptedAppState::new(name(app)))))
            .clone()
    }

    /// Makes the factory reject this app.
    pub fn fail_app_create(&self, app: &str) {
        self.fail_create.borrow_mut().insert(app.to_string());
    }

    /// Gives a PID the security label of an app process.
    pub fn set_label(&self, pid: i32, app: &str) {
        self.labels
            .borrow_mut()
            .insert(pid, format!("{}{app}", sup_seclabel::APP_LABEL_PREFIX));
    }

    /// Makes label reads for a PID fail outright.
    pub fn fail_label(&self, pid: i32) {
        self.label_failures.borrow_mut().insert(pid);
    }

    /// Scripts the wait status the reaper will return for a PID.
    pub fn set_status(&self, pid: i32, status: WaitStatus) {
        self.statuses.borrow_mut().insert(pid, status);
    }
}

/// Death-by-SIGSEGV wait status for a PID.
pub fn segv(pid: i32) -> WaitStatus {
    WaitStatus::Signaled(Pid::from_raw(pid), nix::sys::signal::Signal::SIGSEGV, false)
}

//! Client-held references to individual processes inside apps.
//!
//! Clients create a reference to a configured or ad-hoc process, attach
//! file descriptors, override parameters, and start it inside the app's
//! security domain.  Overrides are never persistent: every record is
//! tagged with the IPC session that created it and is destroyed when
//! that session closes, so a normally started app only ever sees its
//! configured parameters.
//!
//! A configured process can be referenced by at most one client at a
//! time; violating that (like passing a stale reference) is fatal to
//! the offending client session.

use crate::registry::ContainerId;
use crate::Supervisor;
use std::fmt;
use std::os::unix::io::RawFd;
use std::path::Path;
use sup_app::{AppState, FaultAction, Priority, ProcId, ProcStopHandler};
use sup_common::limits::MAX_PRIORITY_NAME_BYTES;
use sup_common::{AppName, ClientResult, Error, ProcName, Result, SessionId, Violation};
use tracing::debug;

/// Opaque client-visible reference to an app process record.
///
/// Stale references are safe: the key space is never reused, so a
/// reference to a deleted record can never alias a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppProcRef(u64);

impl fmt::Display for AppProcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "appProc#{}", self.0)
    }
}

/// One outstanding client-created process reference.
pub(crate) struct AppProcContainer {
    pub(crate) proc: ProcId,
    pub(crate) container: ContainerId,
    /// The IPC session that created this record.
    pub(crate) owner: SessionId,
}

impl Supervisor {
    /// Creates a process reference in an app.
    ///
    /// Either the process name or the executable path may be omitted,
    /// but not both.  The app container is created on demand.  Returns
    /// None (without a violation) when the app or the process object
    /// cannot be created.
    pub fn proc_create(
        &mut self,
        session: SessionId,
        app_name: &AppName,
        proc_name: Option<&ProcName>,
        exec_path: Option<&Path>,
    ) -> ClientResult<Option<AppProcRef>> {
        if proc_name.is_none() && exec_path.is_none() {
            return Err(Violation::new(
                "process name and executable path cannot both be empty",
            ));
        }

        let container_id = match self.create_app(app_name) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        let proc = match self
            .registry
            .get_mut(container_id)
            .app
            .create_proc(proc_name, exec_path)
        {
            Ok(proc) => proc,
            Err(_) => return Ok(None),
        };

        // A process may be referenced by at most one client.
        let already_referenced = self
            .procs
            .iter()
            .any(|(_, record)| record.container == container_id && record.proc == proc);

        if already_referenced {
            return Err(Violation::new("process is already referenced by a client"));
        }

        let key = self.procs.insert(AppProcContainer {
            proc,
            container: container_id,
            owner: session,
        });

        debug!(
            "Created {} for app '{}' on behalf of {}.",
            AppProcRef(key),
            app_name,
            session
        );

        Ok(Some(AppProcRef(key)))
    }

    /// Attaches the process's standard input.  Defaults to `/dev/null`.
    pub fn proc_set_stdin(&mut self, proc_ref: AppProcRef, fd: Option<RawFd>) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;
        self.registry.get_mut(container).app.set_proc_stdin(proc, fd);
        Ok(())
    }

    /// Attaches the process's standard output.  Defaults to the log.
    pub fn proc_set_stdout(&mut self, proc_ref: AppProcRef, fd: Option<RawFd>) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;
        self.registry.get_mut(container).app.set_proc_stdout(proc, fd);
        Ok(())
    }

    /// Attaches the process's standard error.  Defaults to the log.
    pub fn proc_set_stderr(&mut self, proc_ref: AppProcRef, fd: Option<RawFd>) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;
        self.registry.get_mut(container).app.set_proc_stderr(proc, fd);
        Ok(())
    }

    /// Adds a command-line argument, overriding the configured list.
    /// An empty argument finalises an intentionally empty list.
    pub fn proc_add_arg(&mut self, proc_ref: AppProcRef, arg: &str) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.registry
            .get_mut(container)
            .app
            .add_proc_arg(proc, arg)
            .map_err(|_| Violation::new(format!("argument '{arg}' is too long")))
    }

    /// Reverts to the configured argument list.
    pub fn proc_clear_args(&mut self, proc_ref: AppProcRef) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;
        self.registry.get_mut(container).app.clear_proc_args(proc);
        Ok(())
    }

    /// Overrides the process's priority from its string form.
    pub fn proc_set_priority(&mut self, proc_ref: AppProcRef, priority: &str) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        if priority.len() > MAX_PRIORITY_NAME_BYTES {
            return Err(Violation::new(format!(
                "priority string '{priority}' is too long"
            )));
        }

        let priority: Priority = priority.parse()?;

        self.registry
            .get_mut(container)
            .app
            .set_proc_priority(proc, Some(priority))
            .map_err(|e| Violation::new(format!("cannot apply priority: {e}")))
    }

    /// Reverts to the configured or default priority.
    pub fn proc_clear_priority(&mut self, proc_ref: AppProcRef) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.registry
            .get_mut(container)
            .app
            .set_proc_priority(proc, None)
            .map_err(|e| Violation::new(format!("cannot clear priority: {e}")))
    }

    /// Overrides the process's fault action.
    pub fn proc_set_fault_action(
        &mut self,
        proc_ref: AppProcRef,
        action: FaultAction,
    ) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.registry
            .get_mut(container)
            .app
            .set_proc_fault_action(proc, Some(action));

        Ok(())
    }

    /// Reverts to the configured or default fault action.
    pub fn proc_clear_fault_action(&mut self, proc_ref: AppProcRef) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.registry
            .get_mut(container)
            .app
            .set_proc_fault_action(proc, None);

        Ok(())
    }

    /// Installs the process's stop handler.  There is only one handler
    /// per process, so the returned handler reference is the process
    /// reference itself.
    pub fn proc_add_stop_handler(
        &mut self,
        proc_ref: AppProcRef,
        handler: ProcStopHandler,
    ) -> ClientResult<AppProcRef> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.registry
            .get_mut(container)
            .app
            .set_proc_stop_handler(proc, Some(handler));

        Ok(proc_ref)
    }

    /// Removes the process's stop handler.
    ///
    /// A stale reference is not a violation here: the record may
    /// already have been cleaned up with its session.
    pub fn proc_remove_stop_handler(&mut self, proc_ref: AppProcRef) {
        if let Ok((container, proc)) = self.lookup_proc(proc_ref) {
            self.registry
                .get_mut(container)
                .app
                .set_proc_stop_handler(proc, None);
        }
    }

    /// Starts the process, starting the owning app first if it is not
    /// already running.
    pub fn proc_start(&mut self, proc_ref: AppProcRef) -> ClientResult<Result<()>> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        if self.registry.get(container).app.state() != AppState::Running {
            if let Err(e) = self.start_app(container) {
                return Ok(Err(Error::fault(format!(
                    "cannot start app for {proc_ref}: {e}"
                ))));
            }
        }

        Ok(self.registry.get_mut(container).app.start_proc(proc))
    }

    /// Deletes the process reference and the underlying process object.
    pub fn proc_delete(&mut self, proc_ref: AppProcRef) -> ClientResult<()> {
        let (container, proc) = self.lookup_proc(proc_ref)?;

        self.procs.remove(proc_ref.0);
        self.registry.get_mut(container).app.delete_proc(proc);

        Ok(())
    }

    /// Purges every record owned by a closed IPC session.
    pub fn session_closed(&mut self, session: SessionId) {
        debug!("Cleaning up app process references of {}.", session);
        self.purge_procs(None, Some(session));
    }

    /// Number of records currently owned by a session.
    pub fn session_proc_count(&self, session: SessionId) -> usize {
        self.procs
            .iter()
            .filter(|(_, record)| record.owner == session)
            .count()
    }

    /// Total number of outstanding records.
    pub fn proc_ref_count(&self) -> usize {
        self.procs.len()
    }

    /// Purges every record tied to a container that is about to be
    /// destroyed.
    pub(crate) fn purge_procs_for_container(&mut self, container: ContainerId) {
        self.purge_procs(Some(container), None);
    }

    /// Deletes all records matching a container, a session, or both.
    fn purge_procs(&mut self, container: Option<ContainerId>, owner: Option<SessionId>) {
        let doomed: Vec<u64> = self
            .procs
            .iter()
            .filter(|(_, record)| {
                container.map_or(false, |c| record.container == c)
                    || owner.map_or(false, |s| record.owner == s)
            })
            .map(|(key, _)| key)
            .collect();

        for key in doomed {
            if let Some(record) = self.procs.remove(key) {
                self.registry
                    .get_mut(record.container)
                    .app
                    .delete_proc(record.proc);
            }
        }
    }

    fn lookup_proc(&self, proc_ref: AppProcRef) -> ClientResult<(ContainerId, ProcId)> {
        self.procs
            .get(proc_ref.0)
            .map(|record| (record.container, record.proc))
            .ok_or_else(|| Violation::new("invalid application process reference"))
    }
}

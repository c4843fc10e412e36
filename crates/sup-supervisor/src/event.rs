//! The supervisor's event surface.
//!
//! Every input (IPC requests, installer notifications, session
//! closures, watchdog expiries, shutdown) arrives as an [`Event`]
//! on one queue and is handled to completion on the event loop task, so
//! no internal locking is needed anywhere in the core.
//!
//! Requests carry raw strings off the wire; names are validated here,
//! and any client-protocol violation terminates the offending session
//! rather than the supervisor.  Responses travel through oneshot
//! channels so commands with asynchronous completion (stopping an app)
//! reply only once the operation has actually finished.

use crate::approc::AppProcRef;
use crate::Supervisor;
use nix::unistd::Pid;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use sup_app::{AppState, FaultAction, ProcState, ProcStopHandler};
use sup_common::{AppName, ClientResult, ProcName, ResultCode, SessionId, Violation};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// One input to the supervisor core.
pub enum Event {
    /// `ctrl.StartApp`
    StartApp {
        session: SessionId,
        app_name: String,
        respond: oneshot::Sender<ResultCode>,
    },
    /// `ctrl.StopApp`.  The reply is deferred until the app has stopped.
    StopApp {
        session: SessionId,
        app_name: String,
        respond: oneshot::Sender<ResultCode>,
    },
    /// `info.GetState`
    GetAppState {
        session: SessionId,
        app_name: String,
        respond: oneshot::Sender<AppState>,
    },
    /// `info.GetProcState`
    GetProcState {
        session: SessionId,
        app_name: String,
        proc_name: String,
        respond: oneshot::Sender<ProcState>,
    },
    /// `info.GetName`
    GetAppName {
        session: SessionId,
        pid: i32,
        max_bytes: usize,
        respond: oneshot::Sender<(ResultCode, String)>,
    },
    /// `info.GetHash`
    GetAppHash {
        session: SessionId,
        app_name: String,
        max_bytes: usize,
        respond: oneshot::Sender<(ResultCode, String)>,
    },
    /// `appProc.Create`.  Empty names select "unspecified".
    ProcCreate {
        session: SessionId,
        app_name: String,
        proc_name: String,
        exec_path: String,
        respond: oneshot::Sender<Option<AppProcRef>>,
    },
    /// `appProc.SetStdIn`
    ProcSetStdin {
        session: SessionId,
        proc: AppProcRef,
        fd: Option<RawFd>,
    },
    /// `appProc.SetStdOut`
    ProcSetStdout {
        session: SessionId,
        proc: AppProcRef,
        fd: Option<RawFd>,
    },
    /// `appProc.SetStdErr`
    ProcSetStderr {
        session: SessionId,
        proc: AppProcRef,
        fd: Option<RawFd>,
    },
    /// `appProc.AddArg`
    ProcAddArg {
        session: SessionId,
        proc: AppProcRef,
        arg: String,
    },
    /// `appProc.ClearArgs`
    ProcClearArgs { session: SessionId, proc: AppProcRef },
    /// `appProc.SetPriority`
    ProcSetPriority {
        session: SessionId,
        proc: AppProcRef,
        priority: String,
    },
    /// `appProc.ClearPriority`
    ProcClearPriority { session: SessionId, proc: AppProcRef },
    /// `appProc.SetFaultAction`
    ProcSetFaultAction {
        session: SessionId,
        proc: AppProcRef,
        action: FaultAction,
    },
    /// `appProc.ClearFaultAction`
    ProcClearFaultAction { session: SessionId, proc: AppProcRef },
    /// `appProc.AddStopHandler`
    ProcAddStopHandler {
        session: SessionId,
        proc: AppProcRef,
        handler: ProcStopHandler,
        respond: oneshot::Sender<Option<AppProcRef>>,
    },
    /// `appProc.RemoveStopHandler`
    ProcRemoveStopHandler { session: SessionId, proc: AppProcRef },
    /// `appProc.Start`
    ProcStart {
        session: SessionId,
        proc: AppProcRef,
        respond: oneshot::Sender<ResultCode>,
    },
    /// `appProc.Delete`
    ProcDelete { session: SessionId, proc: AppProcRef },
    /// `wdog.WatchdogTimedOut`.  The IPC reply has already been sent.
    WatchdogTimedOut { user_id: u32, proc_id: u32 },
    /// An IPC session closed; its app process records must go.
    SessionClosed { session: SessionId },
    /// Installer notification: an app was (re)installed.
    AppInstalled { app_name: String },
    /// Installer notification: an app was uninstalled.
    AppUninstalled { app_name: String },
    /// Framework teardown.
    Shutdown,
}

/// Runs the supervisor until the event queue closes.
pub async fn run(mut supervisor: Supervisor, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        supervisor.handle_event(event);
    }
}

impl Supervisor {
    /// Handles one event to completion.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::StartApp {
                session,
                app_name,
                respond,
            } => match AppName::new(app_name) {
                Ok(name) => {
                    debug!("Received request to start application '{}'.", name);
                    let _ = respond.send(ResultCode::from_result(&self.launch_app(&name)));
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::StopApp {
                session,
                app_name,
                respond,
            } => match AppName::new(app_name) {
                Ok(name) => {
                    debug!("Received request to stop application '{}'.", name);
                    self.stop_app(&name, respond);
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::GetAppState {
                session,
                app_name,
                respond,
            } => match AppName::new(app_name) {
                Ok(name) => {
                    let _ = respond.send(self.get_app_state(&name));
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::GetProcState {
                session,
                app_name,
                proc_name,
                respond,
            } => match (AppName::new(app_name), ProcName::new(proc_name)) {
                (Ok(app), Ok(proc)) => {
                    let _ = respond.send(self.get_proc_state(&app, &proc));
                }
                (Err(violation), _) | (_, Err(violation)) => self.kill_client(session, violation),
            },

            Event::GetAppName {
                session: _,
                pid,
                max_bytes,
                respond,
            } => {
                let reply = match self.get_app_name(Pid::from_raw(pid), max_bytes) {
                    Ok(name) => (ResultCode::Ok, name),
                    Err(e) => (e.code(), String::new()),
                };
                let _ = respond.send(reply);
            }

            Event::GetAppHash {
                session,
                app_name,
                max_bytes,
                respond,
            } => match AppName::new(app_name) {
                Ok(name) => {
                    let reply = match self.get_app_hash(&name, max_bytes) {
                        Ok(hash) => (ResultCode::Ok, hash),
                        Err(e) => (e.code(), String::new()),
                    };
                    let _ = respond.send(reply);
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::ProcCreate {
                session,
                app_name,
                proc_name,
                exec_path,
                respond,
            } => {
                let result = self.handle_proc_create(session, app_name, proc_name, exec_path);
                match result {
                    Ok(proc_ref) => {
                        let _ = respond.send(proc_ref);
                    }
                    Err(violation) => self.kill_client(session, violation),
                }
            }

            Event::ProcSetStdin { session, proc, fd } => {
                if let Err(violation) = self.proc_set_stdin(proc, fd) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcSetStdout { session, proc, fd } => {
                if let Err(violation) = self.proc_set_stdout(proc, fd) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcSetStderr { session, proc, fd } => {
                if let Err(violation) = self.proc_set_stderr(proc, fd) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcAddArg { session, proc, arg } => {
                if let Err(violation) = self.proc_add_arg(proc, &arg) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcClearArgs { session, proc } => {
                if let Err(violation) = self.proc_clear_args(proc) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcSetPriority {
                session,
                proc,
                priority,
            } => {
                if let Err(violation) = self.proc_set_priority(proc, &priority) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcClearPriority { session, proc } => {
                if let Err(violation) = self.proc_clear_priority(proc) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcSetFaultAction {
                session,
                proc,
                action,
            } => {
                if let Err(violation) = self.proc_set_fault_action(proc, action) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcClearFaultAction { session, proc } => {
                if let Err(violation) = self.proc_clear_fault_action(proc) {
                    self.kill_client(session, violation);
                }
            }

            Event::ProcAddStopHandler {
                session,
                proc,
                handler,
                respond,
            } => match self.proc_add_stop_handler(proc, handler) {
                Ok(handler_ref) => {
                    let _ = respond.send(Some(handler_ref));
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::ProcRemoveStopHandler { session: _, proc } => {
                self.proc_remove_stop_handler(proc);
            }

            Event::ProcStart {
                session,
                proc,
                respond,
            } => match self.proc_start(proc) {
                Ok(result) => {
                    let _ = respond.send(ResultCode::from_result(&result));
                }
                Err(violation) => self.kill_client(session, violation),
            },

            Event::ProcDelete { session, proc } => {
                if let Err(violation) = self.proc_delete(proc) {
                    self.kill_client(session, violation);
                }
            }

            Event::WatchdogTimedOut { user_id, proc_id } => {
                self.watchdog_timed_out(user_id, proc_id);
            }

            Event::SessionClosed { session } => {
                self.session_closed(session);
            }

            Event::AppInstalled { app_name } => match AppName::new(app_name) {
                Ok(name) => self.app_installed(&name),
                Err(violation) => {
                    error!("Installer reported unusable app name: {}.", violation.reason());
                }
            },

            Event::AppUninstalled { app_name } => match AppName::new(app_name) {
                Ok(name) => self.app_uninstalled(&name),
                Err(violation) => {
                    error!("Installer reported unusable app name: {}.", violation.reason());
                }
            },

            Event::Shutdown => {
                self.shutdown();
            }
        }
    }

    fn handle_proc_create(
        &mut self,
        session: SessionId,
        app_name: String,
        proc_name: String,
        exec_path: String,
    ) -> ClientResult<Option<AppProcRef>> {
        let app_name = AppName::new(app_name)?;

        // Empty strings select "unspecified".
        let proc_name = if proc_name.is_empty() {
            None
        } else {
            Some(ProcName::new(proc_name)?)
        };

        let exec_path = if exec_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(exec_path))
        };

        self.proc_create(
            session,
            &app_name,
            proc_name.as_ref(),
            exec_path.as_deref(),
        )
    }

    /// Terminates a client session after a protocol violation.
    ///
    /// Closing the session triggers the same cleanup as a voluntary
    /// disconnect, so the session's process records are purged too.
    fn kill_client(&mut self, session: SessionId, violation: Violation) {
        error!("{}.  Killing client {}.", violation.reason(), session);
        self.session_closed(session);
    }
}

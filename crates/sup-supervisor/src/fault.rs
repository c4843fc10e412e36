//! Child-exit and watchdog-timeout dispatch.
//!
//! Both paths end the same way: apply the policy action, then check
//! whether the app has reached the stopped state and fire its stop
//! handler if so.  That final check is what ties fault recovery into
//! the asynchronous stop machinery in `lifecycle`.

use crate::registry::{ContainerId, StopHandler};
use crate::Supervisor;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use sup_app::{AppState, FaultAction, WatchdogAction};
use sup_common::limits::MAX_APP_NAME_BYTES;
use sup_common::{Error, Result, ResultCode};
use tracing::{error, info};

impl Supervisor {
    /// Handles a SIGCHLD for the given PID.
    ///
    /// Reaps the child if it belongs to an application, then applies the
    /// app's fault policy.
    ///
    /// Errors: NotFound if the PID is not an application process; the
    /// child is left unreaped for the caller to deal with.  Fault if the
    /// application's policy demands a system reboot.
    pub fn sig_child(&mut self, pid: Pid) -> Result<()> {
        // The dying process's label must be read before the reap
        // scrubs it.
        let id = match self.get_app_name(pid, MAX_APP_NAME_BYTES) {
            Ok(name) => {
                match self.registry.find_active(&name) {
                    Some(id) => id,
                    None => {
                        // There is an app name but no active container.
                        // This happens when a non-direct descendant was
                        // still a zombie when the app was deactivated.
                        info!("Reaping app process (PID {}) for stopped app {}.", pid, name);

                        if let Err(e) = self.reaper.reap(pid) {
                            error!("Could not reap child {}: {}.", pid, e);
                        }

                        return Ok(());
                    }
                }
            }
            Err(e) if e.code() == ResultCode::Overflow => {
                panic!("App name of child process {pid} is too long.");
            }
            Err(e) if e.code() == ResultCode::NotFound => {
                // The child may have died before it applied its own
                // label, so fall back to searching the apps for the PID.
                match self.registry.find_active_with_pid(pid) {
                    Some(id) => id,
                    None => {
                        return Err(Error::not_found(format!(
                            "child {pid} is not an application process"
                        )));
                    }
                }
            }
            Err(_) => {
                error!("Could not get app name for child process {}.", pid);
                return Err(Error::not_found(format!(
                    "child {pid} is not an application process"
                )));
            }
        };

        // This child is an application process; reap it now.
        let status = match self.reaper.reap(pid) {
            Ok(status) => status,
            Err(e) => {
                error!("Could not reap child {}: {}.", pid, e);
                return Ok(());
            }
        };

        self.handle_app_fault(id, pid, status)
    }

    /// Applies the fault action for a process that changed state.
    ///
    /// Errors: Fault if the action requires a system reboot.
    fn handle_app_fault(&mut self, id: ContainerId, pid: Pid, status: WaitStatus) -> Result<()> {
        let container = self.registry.get_mut(id);

        let action = container.app.sig_child(pid, status);

        match action {
            FaultAction::Ignore => {}

            FaultAction::RestartApp => {
                if container.app.state() != AppState::Stopped {
                    // Stop the app if it hasn't already stopped.
                    container.app.stop();
                }

                // Restart the app once it has stopped.
                container.stop_handler = Some(StopHandler::Restart);
            }

            FaultAction::StopApp => {
                if container.app.state() != AppState::Stopped {
                    container.app.stop();
                }
            }

            FaultAction::Reboot => {
                return Err(Error::fault(format!(
                    "application '{}' requires a system reboot",
                    container.app.name()
                )));
            }

            FaultAction::RestartProc => {
                // Process-level restarts are resolved inside the app
                // layer and never reach the supervisor.
                panic!("Unexpected fault action {action} at the supervisor.");
            }
        }

        self.check_stopped_and_fire(id);

        Ok(())
    }

    /// Handles a watchdog timeout for the given process.
    ///
    /// The first active app that claims the process owns the event.
    /// The caller replies to the IPC command before dispatching here.
    pub fn watchdog_timed_out(&mut self, user_id: u32, proc_id: u32) {
        info!("Handling watchdog expiry for: userId {}, procId {}", user_id, proc_id);

        for id in self.registry.active_ids() {
            let container = self.registry.get_mut(id);

            let Some(action) = container.app.watchdog_timeout(proc_id) else {
                continue;
            };

            match action {
                WatchdogAction::NotFound => {
                    // Should already have been dealt with in lower
                    // layers; never gets here.
                    panic!("Unhandled watchdog action not found caught by supervisor.");
                }

                WatchdogAction::Ignore | WatchdogAction::Handled => {}

                WatchdogAction::Reboot | WatchdogAction::RestartApp => {
                    if action == WatchdogAction::Reboot {
                        error!(
                            "Watchdog action requires a reboot but a module reboot is not \
                             supported; restarting the app instead."
                        );
                    }

                    if container.app.state() != AppState::Stopped {
                        container.app.stop();
                    }

                    // Restart the app once it has stopped.
                    container.stop_handler = Some(StopHandler::Restart);
                }

                WatchdogAction::StopApp => {
                    if container.app.state() != AppState::Stopped {
                        container.app.stop();
                    }
                }

                WatchdogAction::Error => {
                    panic!("Unhandled watchdog action error caught by supervisor.");
                }
            }

            self.check_stopped_and_fire(id);

            // Stop searching the other apps.
            return;
        }

        // The whole app list was exhausted without any app claiming
        // this process.
        error!(
            "Process pid:{} was not started by the framework. No watchdog action can be taken.",
            proc_id
        );
    }
}

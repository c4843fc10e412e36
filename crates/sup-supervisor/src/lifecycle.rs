//! Application lifecycle: launch, stop, queries, and shutdown.
//!
//! The asynchronous heart of the supervisor is the composite operation
//! "install a stop handler, initiate the stop, then fire the handler
//! right away if the app is already stopped".  Every stop initiation in
//! this module goes through that shape, and the child-signal path covers
//! the asynchronous completion, so a handler can never be left installed
//! without a site responsible for firing it, and never fires twice.

use crate::registry::{ContainerId, StopHandler};
use crate::Supervisor;
use nix::unistd::Pid;
use std::sync::Arc;
use sup_app::{AppState, ProcState};
use sup_common::limits::MAX_PATH_BYTES;
use sup_common::{AppName, Error, ProcName, Result, ResultCode};
use sup_config::{CFG_NODE_APPS_LIST, CFG_NODE_START_MANUAL};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Per-app metadata file dropped into the install directory.
const APP_INFO_FILE: &str = "info.properties";

/// Key of the app's content hash in the info file.
const KEY_STR_MD5: &str = "app.md5";

impl Supervisor {
    /// Starts every installed app that is not marked for manual start.
    ///
    /// Per-app launch failures are logged; there is nothing else to do
    /// about them at start-up.
    pub fn auto_start(&mut self) {
        let config = Arc::clone(&self.config);
        let apps = config.read_txn(CFG_NODE_APPS_LIST);

        let names = apps.child_names();
        if names.is_empty() {
            warn!("No applications installed.");
            return;
        }

        for name in names {
            let app_name = match AppName::new(name.clone()) {
                Ok(app_name) => app_name,
                Err(violation) => {
                    error!(
                        "Configured app name '{}' is unusable ({}).  Application not launched.",
                        name,
                        violation.reason()
                    );
                    continue;
                }
            };

            if apps.child(&name).get_bool(CFG_NODE_START_MANUAL, false) {
                // Known but deferred: give the app its container so it
                // shows up as an installed, stopped app.
                debug!("Deferring manual-start application '{}'.", app_name);
                let _ = self.create_app(&app_name);
            } else {
                let _ = self.launch_app(&app_name);
            }
        }
    }

    /// Launches an app, creating its container if necessary.
    ///
    /// Errors: Duplicate if the app is already running, NotFound if it
    /// is not installed, Fault if it could not be launched.
    pub fn launch_app(&mut self, name: &AppName) -> Result<()> {
        let id = self.create_app(name).map_err(|e| {
            error!("Application '{}' cannot run.", name);
            e
        })?;

        if self.registry.get(id).is_active {
            error!("Application '{}' is already running.", name);
            return Err(Error::duplicate(format!("app '{name}'")));
        }

        self.start_app(id)
    }

    /// Stops an app.  The reply travels through `respond`: immediately
    /// with NotFound if the app is not running, otherwise with Ok once
    /// the stop has actually completed.
    pub fn stop_app(&mut self, name: &AppName, respond: oneshot::Sender<ResultCode>) {
        let Some(id) = self.registry.find_active(name.as_str()) else {
            warn!("Application '{}' is not running and cannot be stopped.", name);
            let _ = respond.send(ResultCode::NotFound);
            return;
        };

        let container = self.registry.get_mut(id);

        // The handler answers the command once the app has stopped.
        container.pending_stop = Some(respond);
        container.stop_handler = Some(StopHandler::RespondToStop);

        container.app.stop();

        // If the app was already stopped the child-signal path will
        // never observe a transition, so fire the handler here.
        self.check_stopped_and_fire(id);
    }

    /// State of an app.  Unknown and inactive apps read as stopped.
    pub fn get_app_state(&self, name: &AppName) -> AppState {
        match self.registry.find_active(name.as_str()) {
            Some(id) => self.registry.get(id).app.state(),
            None => AppState::Stopped,
        }
    }

    /// State of a configured process inside an app.
    pub fn get_proc_state(&self, app_name: &AppName, proc_name: &ProcName) -> ProcState {
        match self.registry.find_active(app_name.as_str()) {
            Some(id) => self.registry.get(id).app.proc_state(proc_name),
            None => ProcState::Stopped,
        }
    }

    /// Application name of the process with the given PID, resolved
    /// through its security label.
    ///
    /// Errors: NotFound if the process is not part of an application,
    /// Overflow if the name does not fit in `max_bytes`.
    pub fn get_app_name(&self, pid: Pid, max_bytes: usize) -> Result<String> {
        sup_seclabel::app_name_from_pid(self.labels.as_ref(), pid, max_bytes)
    }

    /// Content hash of an installed app, read from its info file.
    ///
    /// Errors: NotFound if the app is not installed, Overflow if the
    /// hash does not fit in `max_bytes`, Fault for any other problem
    /// with the info file.
    pub fn get_app_hash(&self, name: &AppName, max_bytes: usize) -> Result<String> {
        let path = self.install_dir.join(name.as_str()).join(APP_INFO_FILE);

        if let Err(e) = std::fs::metadata(&path) {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(Error::not_found(format!("app '{name}' is not installed")));
            }

            error!("Could not stat file '{}': {}.", path.display(), e);
            return Err(Error::fault(format!("cannot access '{}'", path.display())));
        }

        let hash = match sup_properties::get_value_for_key(&path, KEY_STR_MD5) {
            Ok(hash) => hash,
            Err(e @ Error::Overflow { .. }) => return Err(e),
            Err(e) => {
                error!("Could not read {} from '{}': {}.", KEY_STR_MD5, path.display(), e);
                return Err(Error::fault(format!("bad info file for app '{name}'")));
            }
        };

        if hash.len() > max_bytes {
            return Err(Error::overflow(format!(
                "hash of app '{name}' is longer than {max_bytes} bytes"
            )));
        }

        Ok(hash)
    }

    /// Initiates the asynchronous shutdown of every application.
    ///
    /// Inactive containers are destroyed first.  Active apps are then
    /// stopped one at a time, head of the list first, each stop chaining
    /// into the next through the ShutdownNext handler.  Once the active
    /// list is empty the all-apps-stopped handler fires.
    pub fn shutdown(&mut self) {
        self.delete_all_inactive();

        if let Some(id) = self.registry.first_active() {
            let container = self.registry.get_mut(id);

            // This handler continues the shutdown chain once the app
            // has stopped.
            container.stop_handler = Some(StopHandler::ShutdownNext);
            container.app.stop();

            self.check_stopped_and_fire(id);
        } else if let Some(handler) = self.all_stopped_handler.as_mut() {
            handler();
        }
    }

    /// Purges the inactive container of a just-installed or removed
    /// app, so the next launch rebuilds it from the new configuration.
    pub fn app_installed(&mut self, name: &AppName) {
        self.delete_inactive_app(name);
    }

    /// Purges the inactive container of an uninstalled app.
    pub fn app_uninstalled(&mut self, name: &AppName) {
        self.delete_inactive_app(name);
    }

    /// Names of the currently active apps, in list order.
    pub fn active_app_names(&self) -> Vec<String> {
        self.registry
            .active_ids()
            .into_iter()
            .map(|id| self.registry.get(id).app.name().to_string())
            .collect()
    }

    /// Names of the currently inactive apps, in list order.
    pub fn inactive_app_names(&self) -> Vec<String> {
        self.registry
            .inactive_ids()
            .into_iter()
            .map(|id| self.registry.get(id).app.name().to_string())
            .collect()
    }

    /// Looks up the app's container, creating it if this is the first
    /// time the app is referenced since the supervisor started.
    pub(crate) fn create_app(&mut self, name: &AppName) -> Result<ContainerId> {
        if let Some(id) = self.registry.find_active(name.as_str()) {
            return Ok(id);
        }

        if let Some(id) = self.registry.find_inactive(name.as_str()) {
            return Ok(id);
        }

        let config_path = format!("{CFG_NODE_APPS_LIST}/{name}");

        if config_path.len() > MAX_PATH_BYTES {
            error!(
                "App configuration path '{}' too large for internal buffers!",
                config_path
            );
            return Err(Error::fault(format!("config path for '{name}' too long")));
        }

        if self.config.read_txn(&config_path).is_empty() {
            error!("Application '{}' is not installed.", name);
            return Err(Error::not_found(format!("app '{name}'")));
        }

        let app = self.factory.create_app(name, &config_path).map_err(|e| {
            error!("Could not create application '{}': {}.", name, e);
            Error::fault(format!("cannot create app '{name}'"))
        })?;

        Ok(self.registry.insert_inactive(app))
    }

    /// Moves a container to the active list and starts its app.
    pub(crate) fn start_app(&mut self, id: ContainerId) -> Result<()> {
        self.registry.activate(id);

        let container = self.registry.get_mut(id);

        // Reset the stop handler so that an app that stops without any
        // special request is simply deactivated.
        container.stop_handler = Some(StopHandler::Deactivate);

        container.app.start()
    }

    /// Fires the container's stop handler if its app has reached the
    /// stopped state.  Called after every stop initiation and after
    /// every child-exit dispatch.
    pub(crate) fn check_stopped_and_fire(&mut self, id: ContainerId) {
        let container = self.registry.get(id);

        if container.app.state() == AppState::Stopped && container.stop_handler.is_some() {
            self.fire_stop_handler(id);
        }
    }

    fn fire_stop_handler(&mut self, id: ContainerId) {
        let Some(handler) = self.registry.get_mut(id).stop_handler.take() else {
            return;
        };

        match handler {
            StopHandler::Deactivate => self.deactivate_container(id),
            StopHandler::Restart => self.restart_container(id),
            StopHandler::RespondToStop => self.respond_to_stop(id),
            StopHandler::ShutdownNext => self.shutdown_next(id),
        }
    }

    /// Puts the app into the inactive list.
    fn deactivate_container(&mut self, id: ContainerId) {
        info!(
            "Application '{}' has stopped.",
            self.registry.get(id).app.name()
        );

        self.registry.deactivate(id);
    }

    /// Restarts an application that stopped under a restart policy.
    fn restart_container(&mut self, id: ContainerId) {
        let container = self.registry.get_mut(id);

        // Reset the stop handler first so a later stop that needs no
        // restart is handled properly.
        container.stop_handler = Some(StopHandler::Deactivate);

        match container.app.start() {
            Ok(()) => {
                info!("Application '{}' restarted.", container.app.name());
            }
            Err(e) => {
                error!(
                    "Could not restart application '{}': {}.",
                    container.app.name(),
                    e
                );
                self.deactivate_container(id);
            }
        }
    }

    /// Answers the pending stop command, deactivating the app first.
    fn respond_to_stop(&mut self, id: ContainerId) {
        let respond = self.registry.get_mut(id).pending_stop.take();

        self.deactivate_container(id);

        if let Some(respond) = respond {
            // The requester may have disappeared mid-stop; the reply is
            // then dropped.
            let _ = respond.send(ResultCode::Ok);
        }
    }

    /// Destroys the container of an app that stopped during shutdown,
    /// then continues shutting down the remaining apps.
    fn shutdown_next(&mut self, id: ContainerId) {
        info!(
            "Application '{}' has stopped.",
            self.registry.get(id).app.name()
        );

        self.purge_procs_for_container(id);
        drop(self.registry.remove(id));

        self.shutdown();
    }

    fn delete_all_inactive(&mut self) {
        while let Some(id) = self.registry.first_inactive() {
            self.purge_procs_for_container(id);
            let container = self.registry.remove(id);
            debug!("Deleted app {}.", container.app.name());
        }
    }

    fn delete_inactive_app(&mut self, name: &AppName) {
        if let Some(id) = self.registry.find_inactive(name.as_str()) {
            self.purge_procs_for_container(id);
            drop(self.registry.remove(id));
            debug!("Deleted app {}.", name);
        }
    }
}

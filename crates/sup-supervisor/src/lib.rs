//! # Supervisor Core
//!
//! Owns the lifecycle of every installed application on the device.
//!
//! An app can be started by an IPC request or automatically at start-up
//! through [`Supervisor::auto_start`].  The first time an app is started
//! a container is created for it and placed on the active list; when the
//! app stops, the container moves to the inactive list so it does not
//! have to be recreated on restart.  Containers are only destroyed when
//! the app is installed or uninstalled, or during full shutdown.
//!
//! App stops are generally asynchronous: a stop request kills the app's
//! processes, but the app only reaches the stopped state once the last
//! of them has been reaped.  Every site that initiates a stop therefore
//! installs a *stop handler* on the container first and then checks
//! whether the app is already stopped, firing the handler locally if so.
//! Otherwise the handler fires from the child-signal path when the stop
//! completes.  The handler decides what happens next: deactivation,
//! restart, replying to a pending stop command, or continuing a
//! framework shutdown.
//!
//! Clients can also obtain references to individual processes inside an
//! app, override their parameters (stdio, arguments, priority, fault
//! action), and run them inside the app's security domain.  Those
//! overrides are scoped to the creating IPC session and never outlive
//! it.

mod approc;
mod event;
mod fault;
mod lifecycle;
mod refmap;
mod registry;
pub mod wait;

pub use approc::AppProcRef;
pub use event::{run, Event};

use approc::AppProcContainer;
use refmap::RefMap;
use registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use sup_app::AppFactory;
use sup_config::ConfigStore;
use sup_seclabel::LabelReader;
use wait::ChildReaper;

/// The supervisor core.
///
/// All state is owned by this one value and mutated only from the event
/// loop task; there is no internal locking.
pub struct Supervisor {
    registry: Registry,
    procs: RefMap<AppProcContainer>,
    config: Arc<ConfigStore>,
    factory: Box<dyn AppFactory>,
    labels: Box<dyn LabelReader>,
    reaper: Box<dyn ChildReaper>,
    install_dir: PathBuf,
    all_stopped_handler: Option<Box<dyn FnMut()>>,
}

impl Supervisor {
    /// Creates the supervisor.
    ///
    /// `install_dir` is the directory that installed apps unpack into
    /// (the parent of each app's `info.properties`).
    pub fn new(
        config: Arc<ConfigStore>,
        install_dir: impl Into<PathBuf>,
        factory: Box<dyn AppFactory>,
        labels: Box<dyn LabelReader>,
        reaper: Box<dyn ChildReaper>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            procs: RefMap::new(),
            config,
            factory,
            labels,
            reaper,
            install_dir: install_dir.into(),
            all_stopped_handler: None,
        }
    }

    /// Sets the handler called when a [`Supervisor::shutdown`] has
    /// stopped every application.
    pub fn set_shutdown_handler(&mut self, handler: impl FnMut() + 'static) {
        self.all_stopped_handler = Some(Box::new(handler));
    }
}

//! The app registry: containers and their active/inactive placement.
//!
//! Every known app has exactly one container, held in a slot arena and
//! listed on exactly one of the two ordered id lists.  Moving an app
//! between the lists never moves the container itself, so container ids
//! stay valid across activation and deactivation.
//!
//! Invariants:
//! - a container is on exactly one list, and `is_active` agrees with it;
//! - names are unique across both lists;
//! - a container with a stop handler installed is on the active list;
//! - deactivation clears the stop handler.

use nix::unistd::Pid;
use std::collections::VecDeque;
use sup_app::App;
use sup_common::ResultCode;
use tokio::sync::oneshot;

/// Stable id of a container slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContainerId(usize);

/// Continuation fired when a container's app reaches the stopped state.
///
/// A handler fires at most once per transition to stopped: whichever
/// site observes the transition takes the handler before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopHandler {
    /// Move the container to the inactive list.
    Deactivate,
    /// Start the app again (fault recovery).
    Restart,
    /// Reply to the pending stop command, then deactivate.
    RespondToStop,
    /// Destroy the container and continue the framework shutdown.
    ShutdownNext,
}

/// Per-app record coordinating lifecycle.
pub(crate) struct AppContainer {
    pub(crate) app: Box<dyn App>,
    pub(crate) stop_handler: Option<StopHandler>,
    /// The in-flight stop command to answer once the app has stopped.
    pub(crate) pending_stop: Option<oneshot::Sender<ResultCode>>,
    pub(crate) is_active: bool,
}

pub(crate) struct Registry {
    slots: Vec<Option<AppContainer>>,
    free: Vec<usize>,
    active: VecDeque<ContainerId>,
    inactive: VecDeque<ContainerId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: VecDeque::new(),
            inactive: VecDeque::new(),
        }
    }

    /// Inserts a fresh container at the back of the inactive list.
    pub(crate) fn insert_inactive(&mut self, app: Box<dyn App>) -> ContainerId {
        let container = AppContainer {
            app,
            stop_handler: None,
            pending_stop: None,
            is_active: false,
        };

        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(container);
                ContainerId(slot)
            }
            None => {
                self.slots.push(Some(container));
                ContainerId(self.slots.len() - 1)
            }
        };

        self.inactive.push_back(id);
        id
    }

    pub(crate) fn get(&self, id: ContainerId) -> &AppContainer {
        self.slots[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("container {} is vacated", id.0))
    }

    pub(crate) fn get_mut(&mut self, id: ContainerId) -> &mut AppContainer {
        self.slots[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("container {} is vacated", id.0))
    }

    /// Finds an app on the active list by name.
    pub(crate) fn find_active(&self, name: &str) -> Option<ContainerId> {
        self.find_in(&self.active, name)
    }

    /// Finds an app on the inactive list by name.
    pub(crate) fn find_inactive(&self, name: &str) -> Option<ContainerId> {
        self.find_in(&self.inactive, name)
    }

    fn find_in(&self, list: &VecDeque<ContainerId>, name: &str) -> Option<ContainerId> {
        list.iter()
            .copied()
            .find(|&id| self.get(id).app.name().as_str() == name)
    }

    /// Finds the active app that has a top-level process with this PID.
    pub(crate) fn find_active_with_pid(&self, pid: Pid) -> Option<ContainerId> {
        self.active
            .iter()
            .copied()
            .find(|&id| self.get(id).app.has_top_level_proc(pid))
    }

    /// Moves a container to the back of the active list.
    pub(crate) fn activate(&mut self, id: ContainerId) {
        if self.get(id).is_active {
            return;
        }

        self.inactive.retain(|&other| other != id);
        self.active.push_back(id);
        self.get_mut(id).is_active = true;
    }

    /// Moves a container to the back of the inactive list, clearing its
    /// stop handler.
    pub(crate) fn deactivate(&mut self, id: ContainerId) {
        self.active.retain(|&other| other != id);

        {
            let container = self.get_mut(id);
            container.stop_handler = None;

            if !container.is_active {
                return;
            }
            container.is_active = false;
        }

        self.inactive.push_back(id);
    }

    /// Removes a container from the registry entirely.
    pub(crate) fn remove(&mut self, id: ContainerId) -> AppContainer {
        self.active.retain(|&other| other != id);
        self.inactive.retain(|&other| other != id);
        self.free.push(id.0);

        self.slots[id.0]
            .take()
            .unwrap_or_else(|| panic!("container {} is vacated", id.0))
    }

    /// Head of the active list, the next app a shutdown stops.
    pub(crate) fn first_active(&self) -> Option<ContainerId> {
        self.active.front().copied()
    }

    /// Head of the inactive list.
    pub(crate) fn first_inactive(&self) -> Option<ContainerId> {
        self.inactive.front().copied()
    }

    /// Snapshot of the active list in order.
    pub(crate) fn active_ids(&self) -> Vec<ContainerId> {
        self.active.iter().copied().collect()
    }

    /// Snapshot of the inactive list in order.
    pub(crate) fn inactive_ids(&self) -> Vec<ContainerId> {
        self.inactive.iter().copied().collect()
    }
}

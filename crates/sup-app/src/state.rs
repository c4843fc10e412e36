//! App and process state enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse state of an application.
///
/// There is deliberately no intermediate "stopping" state at this level:
/// an app that has been told to stop stays Running until every one of
/// its processes has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// No processes of the app are running.
    Stopped,
    /// At least one process of the app is running.
    Running,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Stopped => write!(f, "stopped"),
            AppState::Running => write!(f, "running"),
        }
    }
}

/// State of one configured process within an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcState {
    Stopped,
    Running,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcState::Stopped => write!(f, "stopped"),
            ProcState::Running => write!(f, "running"),
        }
    }
}

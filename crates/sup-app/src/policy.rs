//! Fault, watchdog, and scheduling policy types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use sup_common::{Error, Violation};

/// Action to take when a process inside an app terminates abnormally.
///
/// `RestartProc` is resolved inside the app object itself; the actions
/// that reach the supervisor are Ignore, RestartApp, StopApp and Reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultAction {
    Ignore,
    RestartProc,
    RestartApp,
    StopApp,
    Reboot,
}

impl fmt::Display for FaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultAction::Ignore => write!(f, "ignore"),
            FaultAction::RestartProc => write!(f, "restartProc"),
            FaultAction::RestartApp => write!(f, "restartApp"),
            FaultAction::StopApp => write!(f, "stopApp"),
            FaultAction::Reboot => write!(f, "reboot"),
        }
    }
}

impl FromStr for FaultAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(FaultAction::Ignore),
            "restartProc" => Ok(FaultAction::RestartProc),
            "restartApp" => Ok(FaultAction::RestartApp),
            "stopApp" => Ok(FaultAction::StopApp),
            "reboot" => Ok(FaultAction::Reboot),
            _ => Err(Error::bad_parameter(format!("unknown fault action '{s}'"))),
        }
    }
}

/// Action to take when a process misses a software watchdog kick.
///
/// NotFound and Error never legitimately reach the supervisor; seeing
/// one there is a bug in the app layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchdogAction {
    NotFound,
    Ignore,
    Handled,
    RestartApp,
    StopApp,
    Reboot,
    Error,
}

impl fmt::Display for WatchdogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogAction::NotFound => write!(f, "notFound"),
            WatchdogAction::Ignore => write!(f, "ignore"),
            WatchdogAction::Handled => write!(f, "handled"),
            WatchdogAction::RestartApp => write!(f, "restartApp"),
            WatchdogAction::StopApp => write!(f, "stopApp"),
            WatchdogAction::Reboot => write!(f, "reboot"),
            WatchdogAction::Error => write!(f, "error"),
        }
    }
}

impl FromStr for WatchdogAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(WatchdogAction::Ignore),
            "handled" => Ok(WatchdogAction::Handled),
            "restartApp" => Ok(WatchdogAction::RestartApp),
            "stopApp" => Ok(WatchdogAction::StopApp),
            "reboot" => Ok(WatchdogAction::Reboot),
            _ => Err(Error::bad_parameter(format!(
                "unknown watchdog action '{s}'"
            ))),
        }
    }
}

/// Scheduling priority of a process.
///
/// The wire representation is one of `idle`, `low`, `medium`, `high`,
/// or `rt1` through `rt32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Priority {
    Idle,
    Low,
    Medium,
    High,
    Rt(u8),
}

impl Priority {
    /// True for the real-time priority band.
    pub fn is_realtime(&self) -> bool {
        matches!(self, Priority::Rt(_))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Idle => write!(f, "idle"),
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Rt(level) => write!(f, "rt{level}"),
        }
    }
}

impl FromStr for Priority {
    type Err = Violation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => return Ok(Priority::Idle),
            "low" => return Ok(Priority::Low),
            "medium" => return Ok(Priority::Medium),
            "high" => return Ok(Priority::High),
            _ => {}
        }

        if let Some(level) = s.strip_prefix("rt") {
            if let Ok(level) = level.parse::<u8>() {
                if (1..=32).contains(&level) {
                    return Ok(Priority::Rt(level));
                }
            }
        }

        Err(Violation::new(format!("priority string '{s}' is invalid")))
    }
}

impl TryFrom<String> for Priority {
    type Error = Violation;

    fn try_from(s: String) -> Result<Self, Violation> {
        s.parse()
    }
}

impl From<Priority> for String {
    fn from(p: Priority) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing() {
        assert_eq!("idle".parse::<Priority>().unwrap(), Priority::Idle);
        assert_eq!("medium".parse::<Priority>().unwrap(), Priority::Medium);
        assert_eq!("rt1".parse::<Priority>().unwrap(), Priority::Rt(1));
        assert_eq!("rt32".parse::<Priority>().unwrap(), Priority::Rt(32));
    }

    #[test]
    fn test_priority_rejects_out_of_range() {
        assert!("rt0".parse::<Priority>().is_err());
        assert!("rt33".parse::<Priority>().is_err());
        assert!("rt".parse::<Priority>().is_err());
        assert!("urgent".parse::<Priority>().is_err());
        assert!("".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_round_trip() {
        for s in ["idle", "low", "medium", "high", "rt7"] {
            let p: Priority = s.parse().unwrap();
            assert_eq!(p.to_string(), s);
        }
    }

    #[test]
    fn test_fault_action_parsing() {
        assert_eq!(
            "restartApp".parse::<FaultAction>().unwrap(),
            FaultAction::RestartApp
        );
        assert!("explode".parse::<FaultAction>().is_err());
    }
}

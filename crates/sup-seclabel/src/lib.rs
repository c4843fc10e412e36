//! # Supervisor Security Labels
//!
//! Resolves the owning application of a process from the process's
//! security label.
//!
//! Every process started inside an app's security domain carries a label
//! of the form `<prefix><appName>`, where the prefix is fixed and known.
//! Stripping the prefix yields the app name.  The label of a terminated
//! but unreaped process is still readable, which is what lets the
//! supervisor attribute a dying child to its app before reaping it.
//!
//! The kernel read is hidden behind the [`LabelReader`] trait so the
//! supervisor core can be driven hermetically in tests.

use nix::unistd::Pid;
use std::path::PathBuf;
use sup_common::{limits::MAX_SECLABEL_BYTES, Error, Result};
use tracing::debug;

/// Label prefix carried by every process running inside an app.
pub const APP_LABEL_PREFIX: &str = "app.";

/// Access to per-process security labels.
pub trait LabelReader {
    /// Reads the raw security label of the given process.
    fn proc_label(&self, pid: Pid) -> Result<String>;
}

/// Reads labels from `/proc/<pid>/attr/current`.
#[derive(Debug, Default)]
pub struct ProcFsLabelReader;

impl LabelReader for ProcFsLabelReader {
    fn proc_label(&self, pid: Pid) -> Result<String> {
        let path: PathBuf = format!("/proc/{pid}/attr/current").into();

        let raw = std::fs::read(&path)?;

        if raw.len() > MAX_SECLABEL_BYTES {
            return Err(Error::overflow(format!(
                "security label of process {pid} exceeds {MAX_SECLABEL_BYTES} bytes"
            )));
        }

        // The attribute is NUL terminated and may carry a trailing newline.
        let label = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\0', '\n'])
            .to_string();

        debug!("Process {} carries label '{}'.", pid, label);

        Ok(label)
    }
}

/// Strips the app prefix from a raw label.
///
/// Returns None when the label does not belong to an app process.
pub fn app_name_from_label(label: &str) -> Option<&str> {
    label.strip_prefix(APP_LABEL_PREFIX)
}

/// Gets the application name of the process with the given PID.
///
/// Returns NotFound if the process is not part of an application and
/// Overflow if the name does not fit in `max_bytes`.
pub fn app_name_from_pid(
    reader: &dyn LabelReader,
    pid: Pid,
    max_bytes: usize,
) -> Result<String> {
    let label = reader.proc_label(pid)?;

    let name = app_name_from_label(&label)
        .ok_or_else(|| Error::not_found(format!("process {pid} is not an app process")))?;

    if name.len() > max_bytes {
        return Err(Error::overflow(format!(
            "app name of process {pid} is longer than {max_bytes} bytes"
        )));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeReader {
        labels: HashMap<i32, String>,
    }

    impl LabelReader for FakeReader {
        fn proc_label(&self, pid: Pid) -> Result<String> {
            self.labels
                .get(&pid.as_raw())
                .cloned()
                .ok_or_else(|| Error::fault(format!("no label for {pid}")))
        }
    }

    fn reader() -> FakeReader {
        let mut labels = HashMap::new();
        labels.insert(100, "app.alpha".to_string());
        labels.insert(200, "framework".to_string());
        labels.insert(300, format!("app.{}", "x".repeat(60)));
        FakeReader { labels }
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(app_name_from_label("app.alpha"), Some("alpha"));
        assert_eq!(app_name_from_label("framework"), None);
        assert_eq!(app_name_from_label(""), None);
    }

    #[test]
    fn test_app_name_from_pid() {
        let name = app_name_from_pid(&reader(), Pid::from_raw(100), 47).unwrap();
        assert_eq!(name, "alpha");
    }

    #[test]
    fn test_non_app_label_is_not_found() {
        let err = app_name_from_pid(&reader(), Pid::from_raw(200), 47).unwrap_err();
        assert_eq!(err.code(), sup_common::ResultCode::NotFound);
    }

    #[test]
    fn test_overlong_name_is_overflow() {
        let err = app_name_from_pid(&reader(), Pid::from_raw(300), 47).unwrap_err();
        assert_eq!(err.code(), sup_common::ResultCode::Overflow);
    }

    #[test]
    fn test_reader_error_propagates() {
        let err = app_name_from_pid(&reader(), Pid::from_raw(999), 47).unwrap_err();
        assert_eq!(err.code(), sup_common::ResultCode::Fault);
    }
}

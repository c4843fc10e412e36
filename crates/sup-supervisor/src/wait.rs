//! Child process waiting and reaping.
//!
//! The supervisor must not reap children that are not application
//! processes, so SIGCHLD handling is split into two steps: peek the
//! next terminated child without consuming it, decide who owns it, and
//! only then reap.  Reaping is behind the [`ChildReaper`] trait so the
//! dispatch logic can be tested without real children.

use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io;

/// Retrieves the exit status of terminated children.
pub trait ChildReaper {
    /// Reaps one specific child, releasing its PID to the OS.
    fn reap(&mut self, pid: Pid) -> io::Result<WaitStatus>;
}

/// Reaps real OS children.
#[derive(Debug, Default)]
pub struct OsChildReaper;

impl ChildReaper for OsChildReaper {
    fn reap(&mut self, pid: Pid) -> io::Result<WaitStatus> {
        waitpid(pid, None).map_err(|e| io::Error::from_raw_os_error(e as i32))
    }
}

/// Peeks the next terminated child without reaping it.
///
/// Returns None when no child is waiting to be reaped.
pub fn peek_next_child() -> io::Result<Option<Pid>> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;

    match waitid(Id::All, flags) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(status) => Ok(status.pid()),
        Err(nix::errno::Errno::ECHILD) => Ok(None),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

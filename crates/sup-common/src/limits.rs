//! Size limits enforced at the framework's boundaries.
//!
//! These mirror the fixed buffer sizes of the on-device IPC surface, so
//! values that would not fit a peer's buffer are rejected before they
//! cross it.

/// Maximum length of an application name, in bytes.
pub const MAX_APP_NAME_BYTES: usize = 47;

/// Maximum length of a process name, in bytes.
pub const MAX_PROC_NAME_BYTES: usize = 47;

/// Maximum length of a filesystem path, in bytes.
pub const MAX_PATH_BYTES: usize = 511;

/// Maximum length of a priority name string, in bytes.
pub const MAX_PRIORITY_NAME_BYTES: usize = 15;

/// Maximum length of an application's content hash string, in bytes.
pub const MAX_MD5_STR_BYTES: usize = 32;

/// Maximum length of a process security label, in bytes.
pub const MAX_SECLABEL_BYTES: usize = 255;

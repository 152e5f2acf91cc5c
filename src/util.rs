//! Internal utilities.

/// Reports whether the process runs with an effective UID of 0.
///
/// Returns `None` where the check is not implemented (Windows elevation is
/// only discovered when the registry refuses a write).
#[must_use]
pub fn is_elevated() -> Option<bool> {
    #[cfg(unix)]
    {
        // SAFETY: `geteuid` has no preconditions and cannot fail.
        Some(unsafe { libc::geteuid() } == 0)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

// macOS launchd backend

pub mod plist;

// Only launchd uses this backend, but it builds on every Unix so the
// reconciliation paths can be exercised anywhere.
#[cfg(unix)]
pub mod launchd;

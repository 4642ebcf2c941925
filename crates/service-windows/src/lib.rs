// Windows Service Control Manager backend

pub mod record;

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod eventlog;
#[cfg(windows)]
pub mod scm;

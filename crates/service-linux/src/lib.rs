// Linux systemd backend

pub mod unit;

#[cfg(unix)]
pub mod systemd;

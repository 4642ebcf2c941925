//! Native service registration and control.
//!
//! [`new`] picks the backend for the target OS at compile time: systemd on
//! Linux, launchd on macOS, the Service Control Manager on Windows. All of
//! them implement the same [`Service`] contract.

use tracing::debug;

pub use service_platform::{
    CallbackPhase, Callbacks, Config, Program, Result, Service, ServiceError,
};

/// Build the backend for this OS. An invalid `config` fails before the
/// service manager or the filesystem is touched.
pub fn new(config: Config) -> Result<Box<dyn Service>> {
    config.validate()?;
    debug!("using {} backend for {}", platform(), config.name);
    backend(config)
}

#[cfg(target_os = "linux")]
fn backend(config: Config) -> Result<Box<dyn Service>> {
    Ok(Box::new(service_linux::systemd::SystemdService::new(config)?))
}

#[cfg(target_os = "macos")]
fn backend(config: Config) -> Result<Box<dyn Service>> {
    Ok(Box::new(service_macos::launchd::LaunchdService::new(config)?))
}

#[cfg(target_os = "windows")]
fn backend(config: Config) -> Result<Box<dyn Service>> {
    Ok(Box::new(service_windows::scm::WindowsService::new(config)?))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn backend(_config: Config) -> Result<Box<dyn Service>> {
    Err(ServiceError::Unsupported(std::env::consts::OS))
}

#[cfg(target_os = "linux")]
const PLATFORM: &str = service_linux::systemd::PLATFORM;
#[cfg(target_os = "macos")]
const PLATFORM: &str = service_macos::launchd::PLATFORM;
#[cfg(target_os = "windows")]
const PLATFORM: &str = service_windows::scm::PLATFORM;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const PLATFORM: &str = "unsupported";

/// Name of the service manager this build drives.
pub fn platform() -> &'static str {
    PLATFORM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_is_rejected() {
        let err = new(Config::new("")).err().unwrap();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        assert!(matches!(
            new(Config::new("../demo")).err().unwrap(),
            ServiceError::Config(_)
        ));
    }

    #[test]
    fn test_platform_is_named() {
        assert!(!platform().is_empty());
        #[cfg(target_os = "linux")]
        assert_eq!(platform(), "Linux systemd");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_new_does_not_touch_disk() {
        let svc = new(Config::new("service-core-facade-test").program("/bin/true")).unwrap();
        assert_eq!(svc.name(), "service-core-facade-test");
        assert!(!std::path::Path::new("/etc/systemd/system/service-core-facade-test.service").exists());
    }
}

//! launchd service management: install, update, uninstall, start and stop a job.

use std::path::PathBuf;

use tracing::{info, warn};

use service_platform::descriptor::{needs_change, DescriptorFile};
use service_platform::invoke::{Invoker, SystemInvoker};
use service_platform::signals::run_until_signalled;
use service_platform::{Config, Program, Result, Service, ServiceError};

use crate::plist;

pub const PLATFORM: &str = "Darwin Launchd";

const SYSTEM_DAEMON_DIR: &str = "/Library/LaunchDaemons";

/// Where launchd looks for jobs: system daemons when privileged, the
/// user's LaunchAgents otherwise.
pub fn descriptor_dir(privileged: bool) -> Result<PathBuf> {
    if privileged {
        return Ok(PathBuf::from(SYSTEM_DAEMON_DIR));
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Library").join("LaunchAgents"))
        .ok_or_else(|| ServiceError::config("unable to determine home directory"))
}

pub struct LaunchdService {
    config: Config,
    descriptor: DescriptorFile,
    invoker: Box<dyn Invoker>,
}

impl LaunchdService {
    pub fn new(config: Config) -> Result<Self> {
        let dir = descriptor_dir(config.privileged)?;
        let invoker = Box::new(SystemInvoker::new(config.privileged));
        Self::with_layout(config, dir, invoker)
    }

    /// Build against an explicit descriptor directory and invoker.
    pub fn with_layout(
        config: Config,
        dir: impl Into<PathBuf>,
        invoker: Box<dyn Invoker>,
    ) -> Result<Self> {
        let config = config.resolved()?;
        let path = dir.into().join(format!("{}.plist", config.name));
        Ok(Self {
            config,
            descriptor: DescriptorFile::new(path),
            invoker,
        })
    }

    pub fn descriptor_path(&self) -> &std::path::Path {
        self.descriptor.path()
    }

    fn launchctl(&self, args: &[&str]) -> Result<()> {
        self.invoker.run_privileged("launchctl", args).map(|_| ())
    }

    fn path_arg(&self) -> Result<&str> {
        service_platform::config::path_str(&self.config.name, self.descriptor.path())
    }
}

impl Service for LaunchdService {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn start(&self) -> Result<()> {
        info!("starting service: {}", self.config.name);
        self.launchctl(&["start", &self.config.name])
    }

    fn stop(&self) -> Result<()> {
        info!("stopping service: {}", self.config.name);
        self.launchctl(&["stop", &self.config.name])
    }

    fn install_or_update_required(&self) -> Result<bool> {
        let rendered = plist::render(&self.config)?;
        let installed = self.descriptor.read_installed()?;
        Ok(needs_change(installed.as_deref(), rendered.as_bytes()))
    }

    fn install_or_update(&self) -> Result<bool> {
        let rendered = plist::render(&self.config)?;
        let path = self.path_arg()?;

        let applied = self
            .descriptor
            .apply(
                rendered.as_bytes(),
                self.invoker.as_ref(),
                |previous| {
                    if previous.is_some() {
                        if let Err(e) = self.launchctl(&["unload", path]) {
                            warn!("unloading previous job {} failed: {}", path, e);
                        }
                    }
                    self.launchctl(&["load", path])
                },
                |previous| match previous {
                    Some(_) => {
                        info!("reloading previous job {}", path);
                        self.launchctl(&["load", path])
                    }
                    None => Ok(()),
                },
            )?;

        if applied.changed() {
            info!("service {} {:?} at {}", self.config.name, applied, path);
        }
        Ok(applied.changed())
    }

    fn uninstall(&self) -> Result<()> {
        if !self.descriptor.exists()? {
            return Err(ServiceError::not_installed(&self.config.name));
        }
        info!("uninstalling launchd job: {}", self.config.name);

        self.launchctl(&["unload", self.path_arg()?])?;
        self.descriptor.remove()?;

        info!("service uninstalled: {}", self.config.name);
        Ok(())
    }

    fn run(&self, program: Box<dyn Program>) -> Result<()> {
        run_until_signalled(&self.config.name, program)
    }
}

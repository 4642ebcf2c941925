//! Linux systemd service management: install/update/uninstall/start/stop a unit.

use std::path::{Path, PathBuf};

use tracing::info;

use service_platform::descriptor::{needs_change, DescriptorFile};
use service_platform::invoke::{Invoker, SystemInvoker};
use service_platform::signals::run_until_signalled;
use service_platform::{Config, Program, Result, Service, ServiceError};

use crate::unit;

pub const PLATFORM: &str = "Linux systemd";

const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// System units when privileged, the user's `systemd/user` directory otherwise.
pub fn unit_dir(privileged: bool) -> Result<PathBuf> {
    if privileged {
        return Ok(PathBuf::from(SYSTEM_UNIT_DIR));
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("systemd").join("user"))
        .ok_or_else(|| ServiceError::config("unable to determine user config directory"))
}

pub struct SystemdService {
    config: Config,
    unit_name: String,
    descriptor: DescriptorFile,
    invoker: Box<dyn Invoker>,
}

impl SystemdService {
    pub fn new(config: Config) -> Result<Self> {
        let dir = unit_dir(config.privileged)?;
        let invoker = Box::new(SystemInvoker::new(config.privileged));
        Self::with_layout(config, dir, invoker)
    }

    pub fn with_layout(
        config: Config,
        dir: impl Into<PathBuf>,
        invoker: Box<dyn Invoker>,
    ) -> Result<Self> {
        let config = config.resolved()?;
        let unit_name = format!("{}.service", config.name);
        let descriptor = DescriptorFile::new(dir.into().join(&unit_name));
        Ok(Self {
            config,
            unit_name,
            descriptor,
            invoker,
        })
    }

    pub fn unit_path(&self) -> &Path {
        self.descriptor.path()
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if !self.config.privileged {
            full.push("--user");
        }
        full.extend_from_slice(args);
        self.invoker.run_privileged("systemctl", &full).map(|_| ())
    }
}

impl Service for SystemdService {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn start(&self) -> Result<()> {
        info!("starting service: {}", self.unit_name);
        self.systemctl(&["start", &self.unit_name])
    }

    fn stop(&self) -> Result<()> {
        info!("stopping service: {}", self.unit_name);
        self.systemctl(&["stop", &self.unit_name])
    }

    fn install_or_update_required(&self) -> Result<bool> {
        let rendered = unit::render(&self.config)?;
        let installed = self.descriptor.read_installed()?;
        Ok(needs_change(installed.as_deref(), rendered.as_bytes()))
    }

    fn install_or_update(&self) -> Result<bool> {
        let rendered = unit::render(&self.config)?;

        let applied = self
            .descriptor
            .apply(
                rendered.as_bytes(),
                self.invoker.as_ref(),
                |previous| {
                    self.systemctl(&["daemon-reload"])?;
                    if previous.is_none() {
                        self.systemctl(&["enable", &self.unit_name])?;
                    }
                    Ok(())
                },
                |_| self.systemctl(&["daemon-reload"]),
            )?;

        if applied.changed() {
            info!(
                "service {} {:?} at {}",
                self.unit_name,
                applied,
                self.unit_path().display()
            );
        }
        Ok(applied.changed())
    }

    fn uninstall(&self) -> Result<()> {
        if !self.descriptor.exists()? {
            return Err(ServiceError::not_installed(&self.config.name));
        }
        info!("uninstalling systemd service: {}", self.unit_name);

        self.systemctl(&["disable", &self.unit_name])?;
        self.descriptor.remove()?;
        self.systemctl(&["daemon-reload"])?;

        info!("service uninstalled: {}", self.unit_name);
        Ok(())
    }

    fn run(&self, program: Box<dyn Program>) -> Result<()> {
        run_until_signalled(&self.config.name, program)
    }
}

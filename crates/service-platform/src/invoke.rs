//! Privilege escalation for service-manager commands.

use std::path::Path;
use std::process::ExitStatus;
#[cfg(unix)]
use std::process::Command;

#[cfg(unix)]
use tracing::debug;

use crate::error::Result;
#[cfg(unix)]
use crate::error::ServiceError;

pub trait Invoker: Send + Sync {
    /// Run `program args..` with the escalation the service needs. A non-zero
    /// exit is an `Invocation` error carrying the command's stderr.
    fn run_privileged(&self, program: &str, args: &[&str]) -> Result<ExitStatus>;

    /// Hand a finished descriptor over to the root identity.
    fn chown_root(&self, path: &Path) -> std::io::Result<()>;
}

/// Runs commands directly, as root, or through `sudo`.
#[cfg(unix)]
pub struct SystemInvoker {
    privileged: bool,
}

#[cfg(unix)]
impl SystemInvoker {
    pub fn new(privileged: bool) -> Self {
        Self { privileged }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        use std::os::unix::process::CommandExt;

        if !self.privileged {
            let mut cmd = Command::new(program);
            cmd.args(args);
            return cmd;
        }

        if nix::unistd::Uid::effective().is_root() {
            let mut cmd = Command::new(program);
            cmd.args(args).uid(0).gid(0);
            cmd
        } else {
            let mut cmd = Command::new("sudo");
            cmd.arg(program).args(args);
            cmd
        }
    }
}

#[cfg(unix)]
impl Invoker for SystemInvoker {
    fn run_privileged(&self, program: &str, args: &[&str]) -> Result<ExitStatus> {
        let command_line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("running {}", command_line);

        let output = self
            .command(program, args)
            .output()
            .map_err(|e| ServiceError::invocation(&command_line, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match output.status.code() {
                Some(code) => format!("exit code {}: {}", code, stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            };
            return Err(ServiceError::invocation(command_line, detail));
        }

        Ok(output.status)
    }

    fn chown_root(&self, path: &Path) -> std::io::Result<()> {
        use nix::unistd::{chown, Gid, Uid};

        if !self.privileged {
            return Ok(());
        }
        chown(path, Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))?;
        Ok(())
    }
}

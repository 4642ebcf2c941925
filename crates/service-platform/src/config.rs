use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Static description of a service registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unique service identifier, also used as the descriptor file name
    pub name: String,

    /// Human readable name (defaults to `name`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Longer description (defaults to `name`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Register system-wide and run as root/LocalSystem
    pub privileged: bool,

    /// Executable to launch; empty means the current executable
    pub program: PathBuf,

    /// Arguments passed to `program` at service start
    pub arguments: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: None,
            description: None,
            privileged: true,
            program: PathBuf::new(),
            arguments: Vec::new(),
            working_directory: None,
        }
    }
}

impl Config {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    /// Check the invariants that must hold before any OS interaction.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ServiceError::config("name field is required"));
        }
        if self
            .name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
        {
            return Err(ServiceError::config(format!(
                "name {:?} must not contain whitespace or path separators",
                self.name
            )));
        }
        Ok(())
    }

    /// Validate and fill in `program` with the running executable when unset.
    pub fn resolved(mut self) -> Result<Self> {
        self.validate()?;
        if self.program.as_os_str().is_empty() {
            let exe = std::env::current_exe().map_err(|e| {
                ServiceError::config(format!("unable to determine program: {}", e))
            })?;
            self.program = std::fs::canonicalize(&exe).unwrap_or(exe);
        }
        Ok(self)
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse service config {}", path.display()))?;
        Ok(config)
    }
}

/// Borrow a path as UTF-8 for descriptor rendering.
pub fn path_str<'a>(name: &str, path: &'a Path) -> Result<&'a str> {
    path.to_str().ok_or_else(|| {
        ServiceError::render(name, format!("path {} is not valid UTF-8", path.display()))
    })
}

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Which hosted-program callback produced a [`ServiceError::Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    Start,
    Stop,
}

impl CallbackPhase {
    /// Exit code reported to the service manager when this callback fails.
    pub fn exit_code(self) -> u32 {
        match self {
            CallbackPhase::Start => 1,
            CallbackPhase::Stop => 2,
        }
    }
}

impl fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackPhase::Start => f.write_str("start"),
            CallbackPhase::Stop => f.write_str("stop"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service config: {0}")]
    Config(String),

    #[error("failed to render descriptor for {target}: {reason}")]
    Render { target: String, reason: String },

    #[error("{op} failed for {}: {source}", path.display())]
    Reconcile {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("`{command}` failed: {detail}")]
    Invocation { command: String, detail: String },

    #[error("service {phase} callback failed: {source:#}")]
    Callback {
        phase: CallbackPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("service {name} is not installed")]
    NotInstalled { name: String },

    #[error("service management is not supported on {0}")]
    Unsupported(&'static str),
}

impl ServiceError {
    pub fn config(msg: impl Into<String>) -> Self {
        ServiceError::Config(msg.into())
    }

    pub fn render(target: impl fmt::Display, reason: impl fmt::Display) -> Self {
        ServiceError::Render {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn reconcile<E>(op: &'static str, path: &Path, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ServiceError::Reconcile {
            op,
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub fn invocation(command: impl Into<String>, detail: impl fmt::Display) -> Self {
        ServiceError::Invocation {
            command: command.into(),
            detail: detail.to_string(),
        }
    }

    pub fn callback(phase: CallbackPhase, source: anyhow::Error) -> Self {
        ServiceError::Callback { phase, source }
    }

    pub fn not_installed(name: impl Into<String>) -> Self {
        ServiceError::NotInstalled { name: name.into() }
    }

    pub fn is_not_installed(&self) -> bool {
        matches!(self, ServiceError::NotInstalled { .. })
    }

    /// The failed callback, if this error came from the hosted program.
    pub fn callback_phase(&self) -> Option<CallbackPhase> {
        match self {
            ServiceError::Callback { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

// Shared service model: the backend trait, config, errors and the pieces
// every platform backend is assembled from.

pub mod bridge;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod invoke;
pub mod service;

#[cfg(unix)]
pub mod signals;

pub use config::Config;
pub use error::{CallbackPhase, Result, ServiceError};
pub use service::{Callbacks, Program, Service};

//! CLI error types

use hearth_daemon::DaemonError;
use hearth_lifecycle::LifecycleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("config error: {0}")]
    Config(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("daemon client error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CtlError {
    /// HTTP-style status class, for the JSON error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Lifecycle(e) => e.status_code(),
            Self::Daemon(_) => 502,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }
}

pub type CtlResult<T> = Result<T, CtlError>;

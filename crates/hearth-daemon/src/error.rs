//! Daemon call errors

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DaemonError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found on node")]
    NotFound,

    #[error("daemon returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid node address: {0}")]
    Address(String),
}

impl DaemonError {
    /// The daemon has no such container or file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<reqwest::Error> for DaemonError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;

//! Lifecycle error types

use hearth_daemon::DaemonError;
use hearth_proto::ProvisionState;
use hearth_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("server {0} is suspended")]
    Suspended(Uuid),

    #[error("server {0} has no container image selected")]
    MissingImage(Uuid),

    #[error("container image {reference} is not offered by the server's image")]
    ImageNotDeclared { reference: String },

    #[error("variable {name}: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("invalid port mapping: {0}")]
    InvalidPorts(String),

    #[error("cannot {action} while the server is {state}")]
    InvalidTransition {
        action: String,
        state: ProvisionState,
    },

    #[error("startup command edits are not allowed for this server")]
    StartupEditDenied,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("node error: {0}")]
    Node(#[from] DaemonError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

impl LifecycleError {
    /// HTTP status class the route layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Suspended(_) | Self::StartupEditDenied => 403,
            Self::MissingImage(_)
            | Self::ImageNotDeclared { .. }
            | Self::InvalidVariable { .. }
            | Self::InvalidPorts(_)
            | Self::Invalid(_) => 400,
            Self::InvalidTransition { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Node(_) => 502,
            Self::Store(_) => 500,
        }
    }

    /// Rejected by policy rather than by a failing dependency. Not worth retrying.
    pub fn is_policy(&self) -> bool {
        matches!(self.status_code(), 400 | 403 | 409)
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

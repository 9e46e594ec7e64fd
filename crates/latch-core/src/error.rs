//! Lock error taxonomy

use latch_store::StoreError;

use crate::model::{LockFailure, LockStatus};

/// Error type for lock acquisition
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to acquire lock '{resource}' (token {token}): {reason}")]
    AcquisitionFailed {
        resource: String,
        token: String,
        reason: LockFailure,
    },

    #[error("acquisition of lock '{resource}' was cancelled")]
    Cancelled { resource: String },

    #[error("store connection failed: {0}")]
    StoreConnection(#[source] StoreError),

    #[error("invalid lock request: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LockError {
    /// Map a failed attempt to its public error
    pub fn acquisition_failed(
        resource: impl Into<String>,
        token: impl Into<String>,
        reason: LockFailure,
    ) -> Self {
        LockError::AcquisitionFailed {
            resource: resource.into(),
            token: token.into(),
            reason,
        }
    }

    /// Failure reason, for acquisition failures
    pub fn reason(&self) -> Option<LockFailure> {
        match self {
            LockError::AcquisitionFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Status of the last attempt, for acquisition failures
    pub fn status(&self) -> Option<LockStatus> {
        self.reason().map(LockStatus::from)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LockError::Cancelled { .. })
    }
}

impl From<config::ConfigError> for LockError {
    fn from(err: config::ConfigError) -> Self {
        LockError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

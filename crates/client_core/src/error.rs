use shared::{
    domain::ModeKind,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("automatic mode requires a threshold")]
    MissingThreshold,
    #[error("threshold must be a finite number")]
    NonFiniteThreshold,
    #[error("threshold '{0}' is not a number")]
    UnparsableThreshold(String),
    #[error("unknown actuator '{0}'")]
    UnknownActuator(String),
    #[error("item name must not be empty")]
    EmptyItemName,
    #[error("stock delta must not be zero")]
    ZeroDelta,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("manual commands are disabled while the device is in {mode} mode")]
    ModeConflict { mode: ModeKind },
    #[error("command dispatch failed: {0}")]
    DispatchFailed(String),
    #[error("unexpected payload from authority: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Classifies a failure coming back from the authority seam. Bodies that
    /// arrived but could not be decoded are protocol errors, everything else
    /// is transport.
    pub(crate) fn from_authority(operation: &'static str, err: anyhow::Error) -> Self {
        let decode_failure = err.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(reqwest::Error::is_decode)
                || cause.downcast_ref::<serde_json::Error>().is_some()
        });
        if decode_failure {
            Self::Protocol(format!("{operation}: {err:#}"))
        } else {
            Self::Transport {
                operation,
                message: format!("{err:#}"),
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Validation(_) => ErrorCode::Validation,
            Self::ModeConflict { .. } => ErrorCode::ModeConflict,
            Self::DispatchFailed(_) => ErrorCode::DispatchFailed,
            Self::Protocol(_) => ErrorCode::Protocol,
        }
    }
}

impl From<&SyncError> for ApiError {
    fn from(value: &SyncError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

use thiserror::Error;

use crate::history::EngineHandle;
use crate::types::EntityRef;

#[derive(Debug, Error)]
pub enum ArmadaError {
    #[error("not initialized: run 'armada init'")]
    NotInitialized,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("You do not have permission to perform this action: {0}")]
    PermissionDenied(String),

    #[error("not applicable: {0}")]
    NotApplicable(String),

    #[error("{0} not found")]
    NotFound(EntityRef),

    #[error("user not found: {0}")]
    UserNotFound(u64),

    #[error("no run with engine handle {0}")]
    RunNotFound(EngineHandle),

    #[error("history {history_id} failed: execution engine rejected the job: {reason}")]
    EngineRejected { history_id: u64, reason: String },

    #[error("storage error: {0}")]
    Db(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    PermissionDenied,
    NotApplicable,
    NotFound,
    Unavailable,
    Internal,
}

impl ArmadaError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ArmadaError::Validation(_) => ErrorCategory::Validation,
            ArmadaError::Conflict(_) => ErrorCategory::Conflict,
            ArmadaError::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            ArmadaError::NotApplicable(_) => ErrorCategory::NotApplicable,
            ArmadaError::NotFound(_)
            | ArmadaError::UserNotFound(_)
            | ArmadaError::RunNotFound(_) => ErrorCategory::NotFound,
            ArmadaError::EngineRejected { .. } => ErrorCategory::Unavailable,
            ArmadaError::NotInitialized
            | ArmadaError::Db(_)
            | ArmadaError::Io(_)
            | ArmadaError::Yaml(_)
            | ArmadaError::Json(_) => ErrorCategory::Internal,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ArmadaError::Validation(msg.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        ArmadaError::Conflict(msg.into())
    }

    pub(crate) fn denied(msg: impl Into<String>) -> Self {
        ArmadaError::PermissionDenied(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ArmadaError>;

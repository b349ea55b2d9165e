use thiserror::Error;

use crate::db::StoreError;

/// Failure kinds surfaced by every engine operation. The kind is preserved
/// all the way to the HTTP layer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("no questions available for subject {subject_id}")]
    NoQuestionsAvailable { subject_id: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::NoQuestionsAvailable { .. } => "no_questions_available",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => Self::Conflict(constraint),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn require_id(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

use thiserror::Error;

pub type Result<T, E = LapseError> = std::result::Result<T, E>;

/// Unified error type covering the failure classes of the capture and lapse pipeline.
#[derive(Debug, Error)]
pub enum LapseError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LapseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LapseError::NotFound(_))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, LapseError::InvalidInput(_))
    }
}

pub fn storage_error(context: impl std::fmt::Display, err: impl std::fmt::Display) -> LapseError {
    LapseError::Storage(format!("{context}: {err}"))
}

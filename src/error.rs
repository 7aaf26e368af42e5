use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown competency: {0}")]
    UnknownCompetency(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl EngineError {
    /// Whether the caller should retry shortly rather than report a failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::UnknownCompetency(_) | Self::Validation(_) => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

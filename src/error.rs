use thiserror::Error;

pub type FerriteResult<T, E = FerriteError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum FerriteError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

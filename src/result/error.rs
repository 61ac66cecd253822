use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    PersistError(#[from] tempfile::PersistError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

pub type ResultResult<T> = Result<T, ResultError>;

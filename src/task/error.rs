use crate::image::error::{ImageError, TableError};
use crate::program::error::AudioError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0} is not installed")]
    MissingDependency(String),

    #[error("{program} exited with {}: {stderr}", exit_status(.code))]
    ReturnCode {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Checksum mismatch: {0}")]
    Checksum(String),

    #[error("File size {actual} of {path} did not match expected size {expected}")]
    FileSize {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unexpected output from {program}: {message}")]
    UnexpectedOutput { program: String, message: String },

    #[error("No disc in {0}")]
    NoDisc(String),

    #[error("Task aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("Giving up on track {track} after {tries} tries")]
    RetriesExhausted { track: u8, tries: u32 },

    #[error("{description} failed: {source}")]
    Failed {
        description: String,
        #[source]
        source: Box<TaskError>,
    },
}

impl TaskError {
    /// Whether running the same task again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::ReturnCode { .. }
            | TaskError::Checksum(_)
            | TaskError::FileSize { .. }
            | TaskError::Io(_)
            | TaskError::Audio(_) => true,
            TaskError::Failed { source, .. } => source.is_retryable(),
            TaskError::MissingDependency(_)
            | TaskError::NoDisc(_)
            | TaskError::UnexpectedOutput { .. }
            | TaskError::Aborted
            | TaskError::Table(_)
            | TaskError::Image(_)
            | TaskError::Join(_)
            | TaskError::RetriesExhausted { .. } => false,
        }
    }

    /// The innermost error below any runner wrapping.
    pub fn root(&self) -> &TaskError {
        match self {
            TaskError::Failed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

fn exit_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |code| format!("code {code}"))
}

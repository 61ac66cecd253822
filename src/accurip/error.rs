use crate::image::error::TableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccurateRipError {
    #[error("Entry {0} not found in AccurateRip database")]
    EntryNotFound(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("AccurateRip returned status code {0}")]
    NoSuccessStatusCode(reqwest::StatusCode),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    BinError(#[from] binrw::Error),

    #[error(transparent)]
    TableError(#[from] TableError),
}

pub type AccurateRipResult<T> = Result<T, AccurateRipError>;

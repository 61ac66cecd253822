use crate::program::error::AudioError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Table does not represent a full CD TOC")]
    NoToc,

    #[error("Table cannot be written as a cue sheet")]
    CannotCue,

    #[error("No track {0} on this table")]
    NoSuchTrack(u8),

    #[error("Track {track} has no index {index}")]
    MissingIndex { track: u8, index: u8 },

    #[error("Track {track}, index {index} has no absolute offset")]
    MissingAbsolute { track: u8, index: u8 },

    #[error("No index beyond track {track}, index {index}")]
    EndOfDisc { track: u8, index: u8 },

    #[error("Track {track}, index {index} had absolute {absolute}, overriding with {relative}")]
    AbsoluteConflict {
        track: u8,
        index: u8,
        absolute: u32,
        relative: u32,
    },
}

pub type TableResult<T> = Result<T, TableError>;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    TableError(#[from] TableError),

    #[error(transparent)]
    AudioError(#[from] AudioError),

    #[error("Cannot find file for {0}")]
    FileNotFound(String),
}

pub type ImageResult<T> = Result<T, ImageError>;

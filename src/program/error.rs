use crate::program::wav::FmtChunk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    BinError(#[from] binrw::Error),

    #[error(transparent)]
    FlacError(#[from] claxon::Error),

    #[error("WAV file has no fmt chunk before its data")]
    MissingFormat,

    #[error("WAV file has no data chunk")]
    MissingData,

    #[error("WAV file is not 16-bit stereo 44.1 kHz PCM: {0:?}")]
    NotCdAudio(FmtChunk),

    #[error("FLAC file has {channels} channels of {bits_per_sample} bits, expected 2 of 16")]
    NotCdFlac { channels: u32, bits_per_sample: u32 },
}

pub type AudioResult<T> = Result<T, AudioError>;

// src/cd/mod.rs
use thiserror::Error;

pub mod info;
pub mod rip;

pub const FRAMES_PER_SECOND: u32 = 75;

/// A sample is one left and one right 16-bit value.
pub const SAMPLES_PER_FRAME: u32 = 588;
pub const WORDS_PER_FRAME: u32 = SAMPLES_PER_FRAME * 2;
pub const SECTOR_SIZE: usize = 2352;
pub const BYTES_PER_FRAME: u32 = SECTOR_SIZE as u32;

/// Standard lead-in before track 1 (2 seconds).
pub const LEAD_IN_FRAMES: u32 = 2 * FRAMES_PER_SECOND;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsfError {
    #[error("Invalid MSF format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

/// Converts `MM:SS:FF` (or a bare frame count) to CD frames.
pub fn msf_to_frames(msf: &str) -> Result<u32, MsfError> {
    let msf = msf.trim();
    if !msf.contains(':') {
        return Ok(msf.parse()?);
    }

    let parts: Vec<&str> = msf.split(':').collect();
    if parts.len() != 3 {
        return Err(MsfError::InvalidFormat(msf.to_string()));
    }

    let minutes: u32 = parts[0].parse()?;
    let seconds: u32 = parts[1].parse()?;
    let frames: u32 = parts[2].parse()?;

    Ok(minutes * 60 * FRAMES_PER_SECOND + seconds * FRAMES_PER_SECOND + frames)
}

pub fn frames_to_msf(frames: u32) -> String {
    let f = frames % FRAMES_PER_SECOND;
    let s = (frames / FRAMES_PER_SECOND) % 60;
    let m = frames / FRAMES_PER_SECOND / 60;

    format!("{m:02}:{s:02}:{f:02}")
}

/// cd-paranoia style `HH:MM:SS.FF`.
pub fn frames_to_hmsf(frames: u32) -> String {
    let f = frames % FRAMES_PER_SECOND;
    let s = (frames / FRAMES_PER_SECOND) % 60;
    let m = (frames / FRAMES_PER_SECOND / 60) % 60;
    let h = frames / FRAMES_PER_SECOND / 60 / 60;

    format!("{h:02}:{m:02}:{s:02}.{f:02}")
}

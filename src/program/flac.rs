use crate::program::READ_CHUNK;
use crate::program::error::{AudioError, AudioResult};
use crate::task::popen::{PopenTask, ProcessHandler};
use claxon::FlacReader;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

pub const FLAC: &str = "flac";
pub const METAFLAC: &str = "metaflac";

/// Streams the decoded samples of a 16-bit stereo FLAC file as little-endian
/// PCM bytes. `start` receives the number of stereo samples first.
pub fn read_pcm<T>(
    path: &Path,
    start: impl FnOnce(u64) -> T,
    mut update: impl FnMut(&mut T, &[u8]),
) -> AudioResult<T> {
    let mut reader = FlacReader::open(path)?;
    let info = reader.streaminfo();
    if info.channels != 2 || info.bits_per_sample != 16 {
        return Err(AudioError::NotCdFlac {
            channels: info.channels,
            bits_per_sample: info.bits_per_sample,
        });
    }

    let samples = match info.samples {
        Some(samples) => samples,
        None => {
            debug!("{} does not state its length, counting samples", path.display());
            count_samples(path)?
        }
    };

    let mut state = start(samples);
    let mut buf = Vec::with_capacity(READ_CHUNK);
    for sample in reader.samples() {
        buf.extend_from_slice(&(sample? as i16).to_le_bytes());
        if buf.len() >= READ_CHUNK {
            update(&mut state, &buf);
            buf.clear();
        }
    }
    if !buf.is_empty() {
        update(&mut state, &buf);
    }

    Ok(state)
}

/// Stereo samples in a FLAC file, counted by decoding when the stream info
/// leaves it open.
pub fn sample_count(path: &Path) -> AudioResult<u64> {
    let reader = FlacReader::open(path)?;
    match reader.streaminfo().samples {
        Some(samples) => Ok(samples),
        None => count_samples(path),
    }
}

fn count_samples(path: &Path) -> AudioResult<u64> {
    let mut reader = FlacReader::open(path)?;
    let mut values = 0u64;
    for sample in reader.samples() {
        sample?;
        values += 1;
    }
    Ok(values / 2)
}

/// `flac` encoding a WAV file, verifying its own output.
pub struct FlacEncode;

impl ProcessHandler for FlacEncode {}

pub type FlacEncodeTask = PopenTask<FlacEncode>;

impl FlacEncode {
    /// Overwrites `flac_path`, which may already exist.
    pub fn task(wav_path: &Path, flac_path: &Path, what: &str) -> FlacEncodeTask {
        let command: Vec<OsString> = vec![
            FLAC.into(),
            "--silent".into(),
            "--verify".into(),
            "-o".into(),
            flac_path.into(),
            "-f".into(),
            wav_path.into(),
        ];
        PopenTask::new(format!("Encoding {what} to FLAC"), command, FlacEncode)
    }
}

/// `metaflac` replacing every Vorbis comment of a file.
pub struct Tagging;

impl ProcessHandler for Tagging {}

pub type TaggingTask = PopenTask<Tagging>;

impl Tagging {
    pub fn task(flac_path: &Path, tags: &BTreeMap<String, String>) -> TaggingTask {
        let mut command: Vec<OsString> = vec![METAFLAC.into(), "--remove-all-tags".into()];
        for (key, value) in tags {
            command.push(format!("--set-tag={key}={value}").into());
        }
        command.push(flac_path.into());

        PopenTask::new("Writing tags to FLAC", command, Tagging)
    }
}

/// `metaflac` adding a front cover picture.
pub struct EmbedPicture;

impl ProcessHandler for EmbedPicture {}

pub type EmbedPictureTask = PopenTask<EmbedPicture>;

impl EmbedPicture {
    /// `None` for images other than JPEG and PNG.
    pub fn task(flac_path: &Path, cover_art_path: &Path) -> Option<EmbedPictureTask> {
        let supported = cover_art_path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                ["jpg", "jpeg", "png"]
                    .iter()
                    .any(|supported| extension.eq_ignore_ascii_case(supported))
            });
        if !supported {
            warn!(
                "No cover art will be added, {} is not a JPEG or PNG image",
                cover_art_path.display()
            );
            return None;
        }

        let mut picture = OsString::from("--import-picture-from=");
        picture.push(cover_art_path);
        let command: Vec<OsString> = vec![METAFLAC.into(), picture, flac_path.into()];

        Some(PopenTask::new("Embed picture to FLAC", command, EmbedPicture))
    }
}

use crate::image::error::TableError;
use crate::image::table::Table;
use crate::program::AudioFormat;
use crate::program::cdparanoia::{FrameSpan, ReadOptions, ReadVerifyTrackTask, RippedTrack, TrackTags};
use crate::program::checksum::Crc32Task;
use crate::result::{RipResult, TrackResult};
use crate::task::error::{TaskError, TaskResult};
use crate::task::runner::SyncRunner;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Attempts at ripping one track before giving up on the disc.
pub const MAX_TRIES: u32 = 5;

/// Peak level at or below which hidden track one audio counts as digital
/// silence.
pub const SILENT: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipOptions {
    pub device: Option<String>,
    /// Read offset in samples.
    pub offset: i32,
    pub overread: bool,
    pub max_retries: u32,
    pub output_dir: PathBuf,
    /// JPEG or PNG embedded into every track.
    pub cover_art: Option<PathBuf>,
}

impl Default for RipOptions {
    fn default() -> Self {
        Self {
            device: None,
            offset: 0,
            overread: false,
            max_retries: MAX_TRIES,
            output_dir: PathBuf::from("."),
            cover_art: None,
        }
    }
}

impl RipOptions {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            offset: self.offset,
            device: self.device.clone(),
            overread: self.overread,
        }
    }
}

pub fn track_file_name(number: u8) -> String {
    format!("track{number:02}.flac")
}

/// Vorbis comments for a track, filled from CD-Text where the disc has it.
pub fn track_tags(table: &Table, number: u8) -> BTreeMap<String, String> {
    let track = (number > 0).then(|| table.track(number).ok()).flatten();
    let track_text = |key: &str| track.and_then(|track| track.cdtext.get(key)).cloned();
    let disc_text = |key: &str| table.cdtext.get(key).cloned();

    let mut tags = BTreeMap::new();
    tags.insert(
        "ARTIST".to_string(),
        track_text("PERFORMER")
            .or_else(|| disc_text("PERFORMER"))
            .unwrap_or_else(|| "Unknown Artist".to_string()),
    );
    tags.insert(
        "TITLE".to_string(),
        track_text("TITLE").unwrap_or_else(|| "Unknown Track".to_string()),
    );
    tags.insert(
        "ALBUM".to_string(),
        disc_text("TITLE").unwrap_or_else(|| "Unknown Disc".to_string()),
    );
    tags.insert("TRACKNUMBER".to_string(), number.to_string());

    // HTOA has no ISRC
    if let Some(isrc) = track.and_then(|track| track.isrc.clone()) {
        tags.insert("ISRC".to_string(), isrc);
    }
    if let Ok(disc_id) = table.musicbrainz_disc_id() {
        tags.insert("MUSICBRAINZ_DISCID".to_string(), disc_id);
    }

    tags
}

/// Runs `attempt` until it succeeds, fails with an error that retrying
/// cannot fix, or has been tried `max_tries` times.
pub async fn retry<T, F>(max_tries: u32, track: u8, mut attempt: F) -> TaskResult<T>
where
    F: AsyncFnMut(u32) -> TaskResult<T>,
{
    for tries in 1..=max_tries {
        debug!("Track {track}, try {tries}");
        match attempt(tries).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                warn!("Track {track} failed on try {tries} of {max_tries}: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    Err(TaskError::RetriesExhausted {
        track,
        tries: max_tries,
    })
}

/// Whether the file at `path` still decodes to the audio that was ripped.
async fn verify_existing(runner: &mut SyncRunner, path: &Path, test_crc: u32) -> bool {
    let mut task = Crc32Task::with_format(path, AudioFormat::Flac);
    match runner.run(&mut task).await {
        Ok(()) => {
            let matches = task.checksum() == Some(test_crc);
            debug!(
                "Track result crc {test_crc:08x}, file crc {:?}, match {matches}",
                task.checksum()
            );
            matches
        }
        Err(e) => {
            warn!("Could not verify {}: {e}", path.display());
            false
        }
    }
}

fn record(track: &mut TrackResult, ripped: &RippedTrack) {
    track.filename = Some(ripped.path.to_string_lossy().into_owned());
    track.test_crc = Some(ripped.checksum);
    track.copy_crc = Some(ripped.checksum);
    track.peak = ripped.peak;
    track.quality = ripped.quality;
    track.test_duration = ripped.test_duration.as_secs_f64();
    track.copy_duration = ripped.copy_duration.as_secs_f64();
}

/// Points the table at a ripped track's file. Hidden track one audio that is
/// digital silence is deleted instead and left to the cue sheet's PREGAP.
pub async fn overlay(table: &mut Table, track: &mut TrackResult) -> TaskResult<()> {
    if track.number != 0 {
        let length = table.track_length(track.number)?;
        let counter = Some(track.number as u32);
        return Ok(table.set_file(track.number, 1, track.filename.as_deref(), length, counter)?);
    }

    let track_start = table.track_start(1)?;
    if track.peak > SILENT {
        return Ok(table.set_file(1, 0, track.filename.as_deref(), track_start, Some(0))?);
    }

    debug!("HTOA peak {} is at most the silence threshold, disregarding", track.peak);
    table.set_file(1, 0, None, track_start, Some(0))?;
    if let Some(filename) = track.filename.take() {
        debug!("Removing {filename}");
        tokio::fs::remove_file(&filename).await?;
    }
    track.skipped = true;
    info!("HTOA discarded, contains digital silence");
    Ok(())
}

/// Rips track `number` (0 for hidden track one audio) into the output
/// directory unless a verified rip is already there, then overlays it onto
/// the result's table.
pub async fn rip_track(
    runner: &mut SyncRunner,
    result: &mut RipResult,
    number: u8,
    options: &RipOptions,
) -> TaskResult<()> {
    let table = &result.table;
    let span = if number == 0 {
        let (start, stop) = table.htoa()?.ok_or(TableError::MissingIndex { track: 1, index: 0 })?;
        FrameSpan { start, stop }
    } else {
        FrameSpan {
            start: table.track_start(number)?,
            stop: table.track_end(number)?,
        }
    };
    let (pregap, pre_emphasis) = match number {
        0 => (0, false),
        _ => {
            let track = table.track(number)?;
            (track.pregap(), track.pre_emphasis)
        }
    };
    let tags = TrackTags {
        tags: track_tags(table, number),
        cover_art: options.cover_art.clone(),
    };
    let track_count = table.tracks.len();

    let previous = result.track_result(number).cloned();
    let path = previous
        .as_ref()
        .and_then(|track| track.filename.as_ref())
        .map(PathBuf::from)
        .unwrap_or_else(|| options.output_dir.join(track_file_name(number)));
    debug!("Track {number} goes to {}", path.display());

    let mut ripped_before = false;
    if tokio::fs::try_exists(&path).await? {
        info!("Verifying track {number} of {track_count}: {}", path.display());
        match previous.as_ref().and_then(|track| track.test_crc) {
            Some(test_crc) if verify_existing(runner, &path, test_crc).await => ripped_before = true,
            _ => {
                warn!("Verification failed, reripping...");
                tokio::fs::remove_file(&path).await?;
            }
        }
    }

    let mut track = previous.unwrap_or_else(|| TrackResult::new(number));
    track.pregap = pregap;
    track.pre_emphasis = pre_emphasis;

    if !ripped_before {
        tokio::fs::create_dir_all(&options.output_dir).await?;
        let table = &result.table;
        let read_options = options.read_options();

        let ripped = retry(options.max_retries, number, async |tries| {
            let extra = if tries > 1 { format!(" (try {tries})") } else { String::new() };
            let what = format!("track {number} of {track_count}{extra}");
            info!("Ripping {what}: {}", path.display());

            let mut task = ReadVerifyTrackTask::new(table, &path, span, &read_options, &tags, &what)?;
            runner.run(&mut task).await?;
            task.ripped()
                .cloned()
                .ok_or_else(|| TaskError::Checksum(format!("{what} produced no file")))
        })
        .await?;

        info!("CRCs match for track {number}");
        info!("Peak level: {:.6}", ripped.peak);
        info!("Rip quality: {:.2}%", ripped.quality * 100.0);
        record(&mut track, &ripped);
    }

    overlay(&mut result.table, &mut track).await?;
    *result.track_result_or_insert(number) = track;
    Ok(())
}

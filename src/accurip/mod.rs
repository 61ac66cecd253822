use crate::accurip::checksum::{AccurateRipChecksum, TrackChecksums};
use crate::accurip::client::AccurateRipClient;
use crate::accurip::response::AccurateRipResponse;
use crate::program::error::AudioResult;
use crate::program::read_pcm;
use crate::result::RipResult;
use log::{debug, error, info};
use std::path::{Path, PathBuf};

pub mod checksum;
pub mod client;
pub mod error;
pub mod response;
pub mod verify;

/// Both checksums of a single track WAV or FLAC file.
pub fn checksum_track(path: &Path, track_number: usize, track_count: usize) -> AudioResult<TrackChecksums> {
    let checksum = read_pcm(
        path,
        |samples| AccurateRipChecksum::new(track_number, track_count, samples),
        |checksum, data| checksum.update(data),
    )?;
    Ok(checksum.finish())
}

/// Both checksums of a track stored as `length` samples from sample `start`
/// of a larger WAV or FLAC file.
pub fn checksum_span(
    path: &Path,
    start: u64,
    length: u64,
    track_number: usize,
    track_count: usize,
) -> AudioResult<TrackChecksums> {
    let (first, end) = (start * 4, (start + length) * 4);
    let (checksum, _) = read_pcm(
        path,
        |_| (AccurateRipChecksum::new(track_number, track_count, length), 0u64),
        |state: &mut (AccurateRipChecksum, u64), data: &[u8]| {
            let chunk_start = state.1;
            let chunk_end = chunk_start + data.len() as u64;
            state.1 = chunk_end;

            let from = first.clamp(chunk_start, chunk_end);
            let to = end.clamp(chunk_start, chunk_end);
            if from < to {
                state.0.update(&data[(from - chunk_start) as usize..(to - chunk_start) as usize]);
            }
        },
    )?;
    Ok(checksum.finish())
}

/// AccurateRip checksums for the tracks of a disc, in order, HTOA excluded.
/// Tracks that cannot be read get `None`.
pub async fn calculate_checksums(track_paths: &[PathBuf]) -> Vec<Option<TrackChecksums>> {
    let track_count = track_paths.len();
    debug!("Checksumming {track_count} tracks");

    let mut checksums = Vec::with_capacity(track_count);
    for (i, path) in track_paths.iter().enumerate() {
        let owned = path.clone();
        let sums = tokio::task::spawn_blocking(move || checksum_track(&owned, i + 1, track_count)).await;

        match sums {
            Ok(Ok(sums)) => checksums.push(Some(sums)),
            Ok(Err(e)) => {
                error!(
                    "Could not calculate AccurateRip checksums for track {} {}: {e}",
                    i + 1,
                    path.display()
                );
                checksums.push(None);
            }
            Err(e) => {
                error!("Checksum task for track {} failed: {e}", i + 1);
                checksums.push(None);
            }
        }
    }

    checksums
}

pub fn print_report(result: &RipResult) {
    for line in verify::report_lines(result) {
        info!("{line}");
    }
}

fn entry_lines(responses: &[AccurateRipResponse]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, response) in responses.iter().enumerate() {
        lines.push(format!(
            "Response {}: {} tracks, disc ids {}-{}, CDDB {}",
            i + 1,
            response.track_count,
            response.disc_id1_hex(),
            response.disc_id2_hex(),
            response.cddb_disc_id_hex()
        ));
        for (position, track) in response.tracks.iter().enumerate() {
            lines.push(format!(
                "  track {:2}: confidence {:3}, checksum {:08x}",
                position + 1,
                track.confidence,
                track.checksum
            ));
        }
    }
    lines
}

/// Fetches the database entry at `path` and logs every pressing in it.
pub async fn show_entry(path: &str) -> anyhow::Result<()> {
    let mut client = AccurateRipClient::new()?;
    let responses = client.get_db_entry(path).await?;
    info!("{path}: {} responses", responses.len());
    for line in entry_lines(&responses) {
        info!("{line}");
    }
    Ok(())
}

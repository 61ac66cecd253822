use crate::accurip::client::{ACCURATERIP_URL, AccurateRipClient};
use crate::accurip::error::AccurateRipError;
use crate::accurip::print_report;
use crate::accurip::verify::verify_result;
use crate::image::disc::DiscImage;
use crate::image::disc_id::MUSICBRAINZ_SERVER;
use crate::image::error::{ImageResult, TableResult};
use crate::image::table::Table;
use crate::image::toc::TocParser;
use crate::program::checksum::AccurateRipChecksumTask;
use crate::result::RipResult;
use crate::task::multi::MultiCombinedTask;
use crate::task::runner::SyncRunner;
use anyhow::bail;
use indicatif::MultiProgress;
use log::{info, warn};
use std::path::{Path, PathBuf};

pub mod cue;
pub mod disc;
pub mod disc_id;
pub mod error;
pub mod table;
pub mod toc;

/// Parse warning: 1-based line number and message.
pub type Message = (usize, String);

/// Length in frames of a track read from a .toc or .cue, from its index 1
/// to the next track's index 1. Only known when both share a source.
pub(crate) fn source_track_length(table: &Table, number: u8) -> Option<u32> {
    if number as usize >= table.tracks.len() {
        return None;
    }

    let this = table.track(number).ok()?.indexes.get(&1)?;
    let next = table.track(number + 1).ok()?.indexes.get(&1)?;

    match (this.counter, next.counter) {
        (Some(a), Some(b)) if a == b => next.relative?.checked_sub(this.relative?),
        _ => None,
    }
}

/// Disc layout of a `.toc` file, or of a `.cue` image and its audio files.
pub async fn load_table(path: &Path) -> ImageResult<Table> {
    let is_toc = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("toc"));
    if is_toc {
        Ok(TocParser::new(path).parse().await?.table)
    } else {
        Ok(DiscImage::open(path).await?.table)
    }
}

/// Logs every identifier derived from a disc layout.
pub fn log_ids(table: &Table) -> TableResult<()> {
    info!("CDDB disc id: {}", table.cddb_disc_id()?);

    let ids = table.accuraterip_ids()?;
    info!("AccurateRip ids: {}-{}", ids.disc_id1_hex(), ids.disc_id2_hex());
    info!("AccurateRip URL: {ACCURATERIP_URL}{}", table.accuraterip_path()?);

    match table.musicbrainz_disc_id() {
        Ok(disc_id) => {
            info!("MusicBrainz disc id: {disc_id}");
            info!("MusicBrainz lookup URL: {}", table.musicbrainz_submit_url(MUSICBRAINZ_SERVER)?);
        }
        Err(e) => warn!("No MusicBrainz disc id: {e}"),
    }

    Ok(())
}

/// Loads the first session from `first` and appends one later session per
/// file in `later`.
pub async fn load_sessions(first: &Path, later: &[PathBuf]) -> ImageResult<Table> {
    let mut table = load_table(first).await?;
    for (i, path) in later.iter().enumerate() {
        let session = i as u32 + 2;
        info!("Adding session {session} from {}", path.display());
        let other = load_table(path).await?;
        table.merge(&other, session)?;
    }
    Ok(table)
}

pub async fn print_image_ids(paths: &[PathBuf]) -> anyhow::Result<()> {
    let Some((first, later)) = paths.split_first() else {
        bail!("No .toc or .cue file given");
    };
    let table = load_sessions(first, later).await?;
    info!("{} has {} tracks", first.display(), table.tracks.len());
    log_ids(&table)?;
    Ok(())
}

/// Checksums every audio track of a cue image and matches them against
/// AccurateRip. Returns whether all tracks were accurate.
pub async fn verify_image(progress: MultiProgress, cue_path: &Path) -> anyhow::Result<bool> {
    let image = DiscImage::open(cue_path).await?;
    let table = &image.table;
    log_ids(table)?;

    let audio_tracks: Vec<_> = image
        .tracks
        .iter()
        .filter(|track| table.track(track.number).is_ok_and(|t| t.audio))
        .collect();
    let track_count = audio_tracks.len();

    let mut result = RipResult::new(table.clone());
    let mut tasks = Vec::with_capacity(track_count);
    for (position, track) in audio_tracks.iter().enumerate() {
        let (start, length) = track.sample_span();
        tasks.push(AccurateRipChecksumTask::new(&track.path, position + 1, track_count).with_span(start, length));
        result.track_result_or_insert(track.number).filename = Some(track.path.to_string_lossy().into_owned());
    }

    // every file was read when the image was opened, so a failure here is fatal
    let mut task = MultiCombinedTask::new("Calculating AccurateRip checksums", tasks);
    SyncRunner::new(progress).run(&mut task).await?;
    let checksums: Vec<_> = task.into_tasks().iter().map(|task| task.checksums()).collect();

    let mut client = AccurateRipClient::new()?;
    let responses = match client.get_db_entry(&table.accuraterip_path()?).await {
        Ok(responses) => responses,
        Err(AccurateRipError::EntryNotFound(path)) => {
            warn!("Disc not found in AccurateRip database: {path}");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let accurate = verify_result(&mut result, &responses, &checksums);
    print_report(&result);
    if accurate {
        info!("Image is accurate");
    } else {
        warn!("Image could not be verified as accurate");
    }

    Ok(accurate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::toc::tests::SAMPLE_TOC;
    use crate::program::wav::tests::cd_wav;

    #[tokio::test]
    async fn load_table_from_toc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.TOC");
        std::fs::write(&path, SAMPLE_TOC).unwrap();

        let table = load_table(&path).await.unwrap();
        assert_eq!(table.tracks.len(), 3);
        assert_eq!(table.leadout, Some(43680));
        assert!(log_ids(&table).is_ok());
    }

    #[tokio::test]
    async fn load_table_from_cue() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01.wav"), cd_wav(&vec![0u8; 2352 * 40])).unwrap();
        let path = dir.path().join("disc.cue");
        std::fs::write(&path, "FILE \"01.wav\" WAVE\n  TRACK 01 AUDIO\n    INDEX 01 00:00:00\n").unwrap();

        let table = load_table(&path).await.unwrap();
        assert_eq!(table.leadout, Some(40));
        assert_eq!(table.track_start(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn later_sessions_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("session1.toc");
        let second = dir.path().join("session2.toc");
        std::fs::write(&first, SAMPLE_TOC).unwrap();
        std::fs::write(&second, SAMPLE_TOC).unwrap();

        let table = load_sessions(&first, &[second]).await.unwrap();
        assert_eq!(table.tracks.len(), 6);
        assert_eq!(table.track(4).unwrap().session, 2);
        assert_eq!(table.leadout, Some(43680 + 43680 + 11400));

        let single = load_sessions(&first, &[]).await.unwrap();
        assert_eq!(single.leadout, Some(43680));
    }
}

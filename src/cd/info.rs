use crate::cd::frames_to_msf;
use crate::image::error::TableResult;
use crate::image::log_ids;
use crate::image::table::Table;
use crate::image::toc::TocFile;
use crate::program::cdrdao::ReadToc;
use crate::task::error::TaskError;
use crate::task::runner::SyncRunner;
use indicatif::MultiProgress;
use log::info;

/// Reads the table of contents of the disc in `device`.
pub async fn read_toc(runner: &mut SyncRunner, device: &str, fast_toc: bool) -> anyhow::Result<TocFile> {
    let mut task = ReadToc::task(device, fast_toc)?;
    runner.run(&mut task).await?;
    let toc = task.into_handler().into_toc().ok_or_else(|| TaskError::UnexpectedOutput {
        program: "cdrdao".to_string(),
        message: "no table of contents written".to_string(),
    })?;
    Ok(toc)
}

fn track_lines(table: &Table) -> TableResult<Vec<String>> {
    let mut lines = Vec::with_capacity(table.tracks.len());
    for track in &table.tracks {
        let kind = if track.audio { "audio" } else { "data" };
        let mut line = format!(
            "Track {:2}: {kind}, start {}, length {}",
            track.number,
            frames_to_msf(table.track_start(track.number)?),
            frames_to_msf(table.track_length(track.number)?)
        );
        if track.pregap() > 0 {
            line.push_str(&format!(", pregap {}", frames_to_msf(track.pregap())));
        }
        if let Some(isrc) = &track.isrc {
            line.push_str(&format!(", ISRC {isrc}"));
        }
        lines.push(line);
    }
    Ok(lines)
}

pub async fn disc_info(progress: MultiProgress, device: &str, fast_toc: bool) -> anyhow::Result<()> {
    let mut runner = SyncRunner::new(progress);
    let toc = read_toc(&mut runner, device, fast_toc).await?;
    let table = &toc.table;

    info!(
        "Disc in {device} has {} tracks, {} audio, {} ms",
        table.tracks.len(),
        table.audio_track_count(),
        table.duration_ms()?
    );
    if let Some(catalog) = &table.catalog {
        info!("Catalog number: {catalog}");
    }
    for line in track_lines(table)? {
        info!("{line}");
    }
    log_ids(table)?;

    Ok(())
}

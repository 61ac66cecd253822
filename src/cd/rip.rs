use crate::accurip::client::AccurateRipClient;
use crate::accurip::error::AccurateRipError;
use crate::accurip::verify::verify_result;
use crate::accurip::{calculate_checksums, print_report};
use crate::built_info;
use crate::cd::info::read_toc;
use crate::image::log_ids;
use crate::image::table::Table;
use crate::program::cdrdao::ReadToc;
use crate::program::rip::{RipOptions, rip_track};
use crate::program::{cdparanoia_version, cdrdao_version};
use crate::result::RipResult;
use crate::result::cache::ResultCache;
use crate::task::runner::SyncRunner;
use anyhow::bail;
use const_format::concatcp;
use indicatif::MultiProgress;
use log::{debug, info, warn};
use std::path::PathBuf;

const PROGRAM: &str = concatcp!(built_info::PKG_NAME, " ", built_info::PKG_VERSION);

/// Data tracks are not ripped; a zero relative offset keeps the table
/// writable as a cue sheet.
fn skip_data_tracks(table: &mut Table) {
    for track in table.tracks.iter_mut().filter(|track| !track.audio) {
        warn!("Track {} is a data track, skipping", track.number);
        for index in track.indexes.values_mut() {
            index.relative.get_or_insert(0);
        }
    }
}

/// Ripped files of every audio track after HTOA, in disc order.
fn ripped_paths(result: &RipResult) -> Vec<PathBuf> {
    result
        .tracks
        .iter()
        .filter(|track| track.number != 0)
        .filter_map(|track| track.filename.as_ref().map(PathBuf::from))
        .collect()
}

/// Rips every audio track of the disc in `options.device`, writes a cue
/// sheet and verifies the rip against AccurateRip. Progress is kept in the
/// result cache after each track so an interrupted rip resumes.
pub async fn rip_disc(progress: MultiProgress, options: RipOptions, keep_toc: bool) -> anyhow::Result<bool> {
    let Some(device) = options.device.clone() else {
        bail!("No device to rip from");
    };
    let mut runner = SyncRunner::new(progress);

    // fast TOC identifies the disc, the full one adds pregaps and indexes
    let fast_toc = read_toc(&mut runner, &device, true).await?;
    let disc_id = fast_toc.table.cddb_disc_id()?;
    log_ids(&fast_toc.table)?;

    let cache = ResultCache::default_location();
    let mut result = match cache.load(disc_id).await? {
        Some(result) => {
            info!("Resuming rip of disc {disc_id}");
            result
        }
        None => {
            let mut task = ReadToc::task(&device, false)?;
            runner.run(&mut task).await?;
            let handler = task.into_handler();
            if keep_toc {
                tokio::fs::create_dir_all(&options.output_dir).await?;
                let destination = options.output_dir.join(format!("{disc_id}.toc"));
                crate::program::cdrdao::save_toc(&handler, &destination).await?;
                info!("Saved TOC to {}", destination.display());
            }

            let Some(toc) = handler.into_toc() else {
                bail!("cdrdao wrote no table of contents");
            };
            let full_id = toc.table.cddb_disc_id()?;
            if full_id != disc_id {
                bail!("Full TOC disc id {full_id} differs from fast TOC disc id {disc_id}");
            }
            RipResult::new(toc.table)
        }
    };

    result.device = Some(device.clone());
    result.offset = options.offset;
    result.overread = options.overread;
    result.cdrdao_version = cdrdao_version().await;
    result.cdparanoia_version = cdparanoia_version().await;
    debug!(
        "cdrdao {:?}, cd-paranoia {:?}",
        result.cdrdao_version, result.cdparanoia_version
    );
    skip_data_tracks(&mut result.table);

    let htoa_done = result.track_result(0).is_some_and(|track| track.skipped);
    if result.table.htoa()?.is_some() && !htoa_done {
        info!("Found hidden track one audio");
        rip_track(&mut runner, &mut result, 0, &options).await?;
        cache.store(disc_id, &result).await?;
    }

    let numbers: Vec<u8> = result
        .table
        .tracks
        .iter()
        .filter(|track| track.audio)
        .map(|track| track.number)
        .collect();
    for number in numbers {
        rip_track(&mut runner, &mut result, number, &options).await?;
        cache.store(disc_id, &result).await?;
    }

    let cue_path = options.output_dir.join(format!("{disc_id}.cue"));
    let cue = result.table.cue(&cue_path.to_string_lossy(), PROGRAM)?;
    tokio::fs::write(&cue_path, cue).await?;
    info!("Wrote cue sheet {}", cue_path.display());

    let checksums = calculate_checksums(&ripped_paths(&result)).await;
    let mut client = AccurateRipClient::new()?;
    let responses = match client.get_db_entry(&result.table.accuraterip_path()?).await {
        Ok(responses) => responses,
        Err(AccurateRipError::EntryNotFound(path)) => {
            warn!("Disc not found in AccurateRip database: {path}");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let accurate = verify_result(&mut result, &responses, &checksums);
    print_report(&result);
    cache.store(disc_id, &result).await?;

    if accurate {
        info!("Rip is accurate");
    } else {
        warn!("Rip could not be verified as accurate");
    }
    Ok(accurate)
}

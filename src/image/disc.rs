use crate::cd::SAMPLES_PER_FRAME;
use crate::image::cue::{CueFile, CueParser};
use crate::image::error::{ImageError, ImageResult};
use crate::image::table::{Index, Table, Track};
use crate::program::sample_count;
use log::debug;
use std::path::{Path, PathBuf};

/// One track of an image: where its audio lives in which file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTrack {
    pub number: u8,
    pub path: PathBuf,
    /// Frames into `path` where index 1 starts.
    pub start: u32,
    /// Frames.
    pub length: u32,
}

impl ImageTrack {
    /// Start and length in stereo samples.
    pub fn sample_span(&self) -> (u64, u64) {
        (
            self.start as u64 * SAMPLES_PER_FRAME as u64,
            self.length as u64 * SAMPLES_PER_FRAME as u64,
        )
    }
}

/// A ripped disc on disk: a cue sheet and the audio files it references,
/// with the disc layout rebuilt from the audio lengths.
#[derive(Debug, Clone)]
pub struct DiscImage {
    pub cue: CueFile,
    pub table: Table,
    pub tracks: Vec<ImageTrack>,
}

impl DiscImage {
    pub async fn open(cue_path: impl AsRef<Path>) -> ImageResult<Self> {
        let cue = CueParser::new(cue_path).parse().await?;
        tokio::task::spawn_blocking(move || Self::from_cue(cue))
            .await
            .map_err(|e| ImageError::IoError(e.into()))?
    }

    /// Track lengths come from the cue sheet where two tracks share a file,
    /// otherwise from the length of the file itself. Audio before track 1
    /// index 1 becomes the pregap of the rebuilt table.
    pub fn from_cue(cue: CueFile) -> ImageResult<Self> {
        let mut tracks = Vec::with_capacity(cue.table.tracks.len());
        for track in &cue.table.tracks {
            let index = track.index(1)?;
            let file = index
                .path
                .as_deref()
                .ok_or_else(|| ImageError::FileNotFound(format!("track {}", track.number)))?;
            let path = cue.real_path(file)?;
            let start = index.relative.unwrap_or(0);

            let length = match cue.track_length(track.number) {
                Some(length) => length,
                None => {
                    let frames = sample_count(&path)? / SAMPLES_PER_FRAME as u64;
                    debug!("{} holds {frames} frames", path.display());
                    (frames as u32).saturating_sub(start)
                }
            };

            tracks.push(ImageTrack {
                number: track.number,
                path,
                start,
                length,
            });
        }

        let first = cue.table.track(1)?.index(1)?;
        let mut offset = first.absolute.or(first.relative).unwrap_or(0);

        let mut table = Table {
            catalog: cue.table.catalog.clone(),
            cdtext: cue.table.cdtext.clone(),
            ..Default::default()
        };
        for (source, image_track) in cue.table.tracks.iter().zip(&tracks) {
            let mut track = Track::new(source.number, source.audio, 1);
            track.isrc = source.isrc.clone();
            track.cdtext = source.cdtext.clone();
            track.pre_emphasis = source.pre_emphasis;
            track.set_index(Index::new(
                1,
                Some(offset),
                Some(image_track.path.to_string_lossy().into_owned()),
                Some(0),
                Some(image_track.number as u32),
            ));
            table.tracks.push(track);
            offset += image_track.length;
        }
        table.leadout = Some(offset);
        debug!("Image of {} tracks ends at frame {offset}", table.tracks.len());

        Ok(Self { cue, table, tracks })
    }
}

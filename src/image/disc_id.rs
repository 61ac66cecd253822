use crate::cd::{FRAMES_PER_SECOND, LEAD_IN_FRAMES};
use crate::image::error::{TableError, TableResult};
use crate::image::table::Table;
use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use lazy_static::lazy_static;
use log::debug;
use sha1::{Digest, Sha1};
use std::fmt;

/// Offset the second session of an Enhanced CD starts past the lead-out,
/// as MusicBrainz accounts for it.
const ENHANCED_CD_GAP: u32 = 11400;

pub const MUSICBRAINZ_SERVER: &str = "https://musicbrainz.org";

lazy_static! {
    /// MusicBrainz' URL-safe base64: `+/=` become `._-`.
    static ref MUSICBRAINZ_BASE64: GeneralPurpose = GeneralPurpose::new(
        &Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._")
            .expect("valid base64 alphabet"),
        GeneralPurposeConfig::new().with_encode_padding(false),
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CddbDiscId(pub u32);

impl fmt::Display for CddbDiscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CddbValues {
    pub disc_id: CddbDiscId,
    pub track_count: usize,
    /// Track starts including the two second lead-in.
    pub offsets: Vec<u32>,
    /// Leadout in seconds including the lead-in.
    pub total_seconds: u32,
    pub playable_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccurateRipIds {
    pub disc_id1: u32,
    pub disc_id2: u32,
}

impl AccurateRipIds {
    pub fn disc_id1_hex(&self) -> String {
        format!("{:08x}", self.disc_id1)
    }

    pub fn disc_id2_hex(&self) -> String {
        format!("{:08x}", self.disc_id2)
    }
}

fn digit_sum(mut value: u32) -> u32 {
    let mut sum = 0;
    while value > 0 {
        sum += value % 10;
        value /= 10;
    }
    sum
}

impl Table {
    fn require_toc(&self) -> TableResult<()> {
        if self.has_toc() {
            Ok(())
        } else {
            Err(TableError::NoToc)
        }
    }

    pub fn cddb_values(&self) -> TableResult<CddbValues> {
        self.require_toc()?;

        let mut offsets = Vec::with_capacity(self.tracks.len());
        let mut n = 0u32;
        for track in &self.tracks {
            let offset = self.track_start(track.number)? + LEAD_IN_FRAMES;
            offsets.push(offset);
            n += digit_sum(offset / FRAMES_PER_SECOND);
        }

        let last = self.tracks.len() as u8;
        let leadout = self.track_end(last)? + 1;
        let start = self.track_start(1)?;
        let playable_seconds = leadout / FRAMES_PER_SECOND - start / FRAMES_PER_SECOND;
        let total_seconds = (leadout + LEAD_IN_FRAMES) / FRAMES_PER_SECOND;

        let track_count = self.tracks.len();
        let value = ((n % 0xff) << 24) | ((playable_seconds & 0xffff) << 8) | (track_count as u32 & 0xff);

        Ok(CddbValues {
            disc_id: CddbDiscId(value),
            track_count,
            offsets,
            total_seconds,
            playable_seconds,
        })
    }

    pub fn cddb_disc_id(&self) -> TableResult<CddbDiscId> {
        Ok(self.cddb_values()?.disc_id)
    }

    /// Both AccurateRip disc ids, computed over audio tracks only.
    pub fn accuraterip_ids(&self) -> TableResult<AccurateRipIds> {
        self.require_toc()?;

        let mut disc_id1 = 0u32;
        let mut disc_id2 = 0u32;
        for track in self.tracks.iter().filter(|track| track.audio) {
            let offset = self.track_start(track.number)?;
            disc_id1 = disc_id1.wrapping_add(offset);
            disc_id2 = disc_id2.wrapping_add(offset.max(1).wrapping_mul(track.number as u32));
        }

        let end = self.track_end(self.tracks.len() as u8)? + 1;
        let audio_count = self.audio_track_count() as u32;
        disc_id1 = disc_id1.wrapping_add(end);
        disc_id2 = disc_id2.wrapping_add(end.wrapping_mul(audio_count + 1));

        Ok(AccurateRipIds { disc_id1, disc_id2 })
    }

    /// Database path, sharded on the last three hex digits of disc id 1.
    pub fn accuraterip_path(&self) -> TableResult<String> {
        let ids = self.accuraterip_ids()?;
        let cddb = self.cddb_disc_id()?;
        let id1 = ids.disc_id1_hex();
        let shard: Vec<char> = id1.chars().rev().take(3).collect();

        Ok(format!(
            "{}/{}/{}/dBAR-{:03}-{}-{}-{}.bin",
            shard[0],
            shard[1],
            shard[2],
            self.audio_track_count(),
            id1,
            ids.disc_id2_hex(),
            cddb
        ))
    }

    /// First track, last audio track, leadout and audio track offsets as
    /// MusicBrainz defines them, all including the lead-in.
    ///
    /// A data track at the end (Enhanced CD) moves the leadout back to the
    /// end of the audio session.
    pub fn musicbrainz_values(&self) -> TableResult<Vec<u32>> {
        self.require_toc()?;

        let audio_count = self.audio_track_count();
        let last_track = self.tracks.last().ok_or(TableError::NoToc)?;

        let leadout = if !last_track.audio {
            self.track_start(last_track.number)? - ENHANCED_CD_GAP + LEAD_IN_FRAMES
        } else {
            let additional = self
                .tracks
                .iter()
                .filter(|track| !track.audio && track.number != last_track.number)
                .count();
            let last = (audio_count + additional) as u8;
            self.track_end(last)? + 1 + LEAD_IN_FRAMES
        };

        let mut values = vec![1, audio_count as u32, leadout];
        for track in self.tracks.iter().filter(|track| track.audio) {
            values.push(self.track_start(track.number)? + LEAD_IN_FRAMES);
        }

        Ok(values)
    }

    pub fn musicbrainz_disc_id(&self) -> TableResult<String> {
        let values = self.musicbrainz_values()?;

        let mut hasher = Sha1::new();
        hasher.update(format!("{:02X}", values[0]));
        hasher.update(format!("{:02X}", values[1]));
        for position in 0..100 {
            let offset = values.get(position + 2).copied().unwrap_or(0);
            hasher.update(format!("{offset:08X}"));
        }

        let digest = hasher.finalize();
        let mut disc_id = MUSICBRAINZ_BASE64.encode(digest);
        // 20 bytes encode to 27 characters; the standard pads with one `=`.
        while disc_id.len() % 4 != 0 {
            disc_id.push('-');
        }
        debug!("MusicBrainz disc id {disc_id} from {values:?}");

        Ok(disc_id)
    }

    pub fn musicbrainz_submit_url(&self, server: &str) -> TableResult<String> {
        let values = self.musicbrainz_values()?;
        let disc_id = self.musicbrainz_disc_id()?;
        let toc = values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("+");

        Ok(format!(
            "{}/cdtoc/attach?toc={toc}&tracks={}&id={disc_id}",
            server.trim_end_matches('/'),
            values[1]
        ))
    }
}

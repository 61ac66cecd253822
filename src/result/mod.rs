use crate::image::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod error;

/// Bumped whenever the persisted layout changes; older entries are dropped.
pub const RESULT_VERSION: u32 = 1;

/// Local and database checksums for one AccurateRip version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccurateRipVersionResult {
    /// Checksum of the ripped audio.
    pub crc: Option<u32>,
    /// Database checksum matching `crc`.
    pub db_crc: Option<u32>,
    /// Confidence of the matched database checksum.
    pub db_confidence: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccurateRipTrackResult {
    pub v1: AccurateRipVersionResult,
    pub v2: AccurateRipVersionResult,
    /// Highest confidence any pressing has for this track, matched or not.
    pub db_max_confidence: Option<u8>,
    pub db_max_confidence_crc: Option<u32>,
}

impl AccurateRipTrackResult {
    pub fn matched(&self) -> bool {
        self.v1.db_crc.is_some() || self.v2.db_crc.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackResult {
    /// 0 for hidden track one audio.
    pub number: u8,
    pub filename: Option<String>,
    /// Frames.
    pub pregap: u32,
    pub pre_emphasis: bool,
    pub peak: f64,
    pub quality: f64,
    pub test_crc: Option<u32>,
    pub copy_crc: Option<u32>,
    pub test_duration: f64,
    pub copy_duration: f64,
    pub accurip: bool,
    pub ar: AccurateRipTrackResult,
    /// Set when the track was found to be digital silence and discarded.
    pub skipped: bool,
}

impl TrackResult {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipResult {
    pub version: u32,
    pub created: DateTime<Utc>,
    /// Read offset in samples.
    pub offset: i32,
    pub overread: bool,
    pub table: Table,
    pub tracks: Vec<TrackResult>,
    pub device: Option<String>,
    pub cdrdao_version: Option<String>,
    pub cdparanoia_version: Option<String>,
}

impl RipResult {
    pub fn new(table: Table) -> Self {
        Self {
            version: RESULT_VERSION,
            created: Utc::now(),
            offset: 0,
            overread: false,
            table,
            tracks: Vec::new(),
            device: None,
            cdrdao_version: None,
            cdparanoia_version: None,
        }
    }

    pub fn track_result(&self, number: u8) -> Option<&TrackResult> {
        self.tracks.iter().find(|track| track.number == number)
    }

    /// The result for `number`, added if missing. Tracks stay in number
    /// order so HTOA comes first.
    pub fn track_result_or_insert(&mut self, number: u8) -> &mut TrackResult {
        let position = match self.tracks.iter().position(|track| track.number >= number) {
            Some(position) if self.tracks[position].number == number => position,
            Some(position) => {
                self.tracks.insert(position, TrackResult::new(number));
                position
            }
            None => {
                self.tracks.push(TrackResult::new(number));
                self.tracks.len() - 1
            }
        };
        &mut self.tracks[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_result_lookup_by_number() {
        let mut result = RipResult::new(Table::default());
        result.track_result_or_insert(2).peak = 0.5;
        result.track_result_or_insert(0);
        result.track_result_or_insert(1);
        result.track_result_or_insert(2).quality = 1.0;

        let numbers: Vec<u8> = result.tracks.iter().map(|t| t.number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(result.track_result(2).unwrap().peak, 0.5);
        assert_eq!(result.track_result(2).unwrap().quality, 1.0);
        assert!(result.track_result(3).is_none());
    }

    #[test]
    fn matched_needs_a_database_checksum() {
        let mut ar = AccurateRipTrackResult::default();
        assert!(!ar.matched());
        ar.v2.db_crc = Some(1);
        assert!(ar.matched());
    }
}

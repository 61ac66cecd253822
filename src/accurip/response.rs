use crate::accurip::error::AccurateRipResult;
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// One submitted pressing of a disc.
///
/// Tracks are indexed by position on the disc; hidden track one audio is
/// not part of the database.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct AccurateRipResponse {
    pub track_count: u8,
    pub disc_id1: u32,
    pub disc_id2: u32,
    pub cddb_disc_id: u32,
    #[br(count = track_count)]
    pub tracks: Vec<ResponseTrack>,
}

#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ResponseTrack {
    pub confidence: u8,
    pub checksum: u32,
    /// Checksum of frame 450 only, used for offset detection.
    pub frame450_checksum: u32,
}

impl AccurateRipResponse {
    pub fn disc_id1_hex(&self) -> String {
        format!("{:08x}", self.disc_id1)
    }

    pub fn disc_id2_hex(&self) -> String {
        format!("{:08x}", self.disc_id2)
    }

    pub fn cddb_disc_id_hex(&self) -> String {
        format!("{:08x}", self.cddb_disc_id)
    }

    pub fn confidence(&self, position: usize) -> Option<u8> {
        self.tracks.get(position).map(|track| track.confidence)
    }

    pub fn checksum(&self, position: usize) -> Option<u32> {
        self.tracks.get(position).map(|track| track.checksum)
    }
}

/// Splits a database entry into its concatenated responses.
pub fn parse_responses(data: &[u8]) -> AccurateRipResult<Vec<AccurateRipResponse>> {
    let mut cursor = Cursor::new(data);
    let mut responses = Vec::new();

    while (cursor.position() as usize) < data.len() {
        responses.push(AccurateRipResponse::read(&mut cursor)?);
    }

    Ok(responses)
}

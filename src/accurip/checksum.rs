use crate::cd::SAMPLES_PER_FRAME;
use serde::{Deserialize, Serialize};

/// Samples skipped at the start of the first and the end of the last track.
const SKIPPED_SAMPLES: u64 = SAMPLES_PER_FRAME as u64 * 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackChecksums {
    pub v1: u32,
    pub v2: u32,
}

impl TrackChecksums {
    pub fn v1_hex(&self) -> String {
        format!("{:08x}", self.v1)
    }

    pub fn v2_hex(&self) -> String {
        format!("{:08x}", self.v2)
    }
}

/// Running AccurateRip v1 and v2 checksums over one track's PCM data.
///
/// Each sample is a little-endian 32-bit word holding the left and right
/// 16-bit values, weighted by its 1-based position in the track.
#[derive(Debug, Clone)]
pub struct AccurateRipChecksum {
    check_from: u64,
    check_to: u64,
    position: u64,
    pending: Vec<u8>,
    v1: u32,
    v2: u32,
}

impl AccurateRipChecksum {
    pub fn new(track_number: usize, track_count: usize, sample_count: u64) -> Self {
        let check_from = if track_number == 1 { SKIPPED_SAMPLES } else { 0 };
        let check_to = if track_number == track_count {
            sample_count.saturating_sub(SKIPPED_SAMPLES)
        } else {
            sample_count
        };

        Self {
            check_from,
            check_to,
            position: 1,
            pending: Vec::with_capacity(4),
            v1: 0,
            v2: 0,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        if !self.pending.is_empty() {
            let needed = 4 - self.pending.len();
            let take = needed.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < 4 {
                return;
            }
            let word = u32::from_le_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]);
            self.pending.clear();
            self.add(word);
        }

        let mut words = data.chunks_exact(4);
        for word in &mut words {
            self.add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
        self.pending.extend_from_slice(words.remainder());
    }

    fn add(&mut self, value: u32) {
        let position = self.position;
        if position >= self.check_from && position <= self.check_to {
            self.v1 = self.v1.wrapping_add((position as u32).wrapping_mul(value));

            let product = value as u64 * (position & 0xffff_ffff);
            self.v2 = self
                .v2
                .wrapping_add((product & 0xffff_ffff) as u32)
                .wrapping_add((product >> 32) as u32);
        }
        self.position += 1;
    }

    pub fn finish(self) -> TrackChecksums {
        TrackChecksums {
            v1: self.v1,
            v2: self.v2,
        }
    }
}

/// Both checksums of a complete track held in memory.
pub fn accuraterip_checksum(data: &[u8], track_number: usize, track_count: usize) -> TrackChecksums {
    let mut checksum = AccurateRipChecksum::new(track_number, track_count, data.len() as u64 / 4);
    checksum.update(data);
    checksum.finish()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Twelve CD frames of deterministic noise.
    pub(crate) fn noise() -> Vec<u8> {
        (1..=588u64 * 12)
            .flat_map(|p| (((p * 2654435761 + 12345) & 0xffff_ffff) as u32).to_le_bytes())
            .collect()
    }

    #[test]
    fn single_track_skips_both_edges() {
        let sums = accuraterip_checksum(&noise(), 1, 1);
        assert_eq!(sums.v1_hex(), "9709421c");
        assert_eq!(sums.v2_hex(), "9728f57f");
    }

    #[test]
    fn first_middle_and_last_track() {
        let data = noise();
        assert_eq!(
            accuraterip_checksum(&data, 1, 3),
            TrackChecksums { v1: 0x509578a4, v2: 0x51327925 }
        );
        assert_eq!(
            accuraterip_checksum(&data, 2, 3),
            TrackChecksums { v1: 0xfb6b2ba0, v2: 0xfc291f92 }
        );
        assert_eq!(
            accuraterip_checksum(&data, 3, 3),
            TrackChecksums { v1: 0x41def518, v2: 0x421f9bec }
        );
    }

    #[test]
    fn streaming_matches_one_shot_across_odd_chunks() {
        let data = noise();
        let mut checksum = AccurateRipChecksum::new(2, 3, data.len() as u64 / 4);
        for chunk in data.chunks(4093) {
            checksum.update(chunk);
        }
        assert_eq!(checksum.finish(), accuraterip_checksum(&data, 2, 3));
    }

    #[test]
    fn track_shorter_than_skipped_edge_is_zero() {
        let data = &noise()[..400];
        assert_eq!(accuraterip_checksum(data, 1, 1), TrackChecksums { v1: 0, v2: 0 });
    }
}

use crate::accurip::checksum::TrackChecksums;
use crate::accurip::response::AccurateRipResponse;
use crate::result::{AccurateRipVersionResult, RipResult, TrackResult};
use log::{debug, error, warn};

/// Stores local and database checksums on the result's tracks and reports
/// whether every track matched the database under either version.
///
/// `checksums` holds one entry per non-HTOA track in disc order. Responses
/// for a different number of tracks are skipped.
pub fn verify_result(
    result: &mut RipResult,
    responses: &[AccurateRipResponse],
    checksums: &[Option<TrackChecksums>],
) -> bool {
    // HTOA is not in the database
    let mut tracks: Vec<&mut TrackResult> = result
        .tracks
        .iter_mut()
        .filter(|track| track.number != 0)
        .collect();
    store_local_checksums(&mut tracks, checksums);
    if tracks.is_empty() || checksums.is_empty() || responses.is_empty() {
        return false;
    }

    let responses: Vec<&AccurateRipResponse> = responses
        .iter()
        .filter(|response| {
            if response.tracks.len() == tracks.len() {
                true
            } else {
                warn!(
                    "Skipping AccurateRip response {} for {} tracks, disc has {}",
                    response.cddb_disc_id_hex(),
                    response.tracks.len(),
                    tracks.len()
                );
                false
            }
        })
        .collect();
    if responses.is_empty() {
        return false;
    }

    assign_confidences(&mut tracks, &responses);
    match_responses(&mut tracks, &responses)
}

fn store_local_checksums(tracks: &mut [&mut TrackResult], checksums: &[Option<TrackChecksums>]) {
    for (position, track) in tracks.iter_mut().enumerate() {
        let local = checksums.get(position).copied().flatten();
        track.ar.v1.crc = local.map(|sums| sums.v1);
        track.ar.v2.crc = local.map(|sums| sums.v2);
    }
}

fn assign_confidences(tracks: &mut [&mut TrackResult], responses: &[&AccurateRipResponse]) {
    for (position, track) in tracks.iter_mut().enumerate() {
        let mut max: Option<(u8, u32)> = None;
        for response in responses {
            if let Some(entry) = response.tracks.get(position)
                && max.is_none_or(|(confidence, _)| entry.confidence > confidence)
            {
                max = Some((entry.confidence, entry.checksum));
            }
        }
        track.ar.db_max_confidence = max.map(|(confidence, _)| confidence);
        track.ar.db_max_confidence_crc = max.map(|(_, checksum)| checksum);
    }
}

fn match_version(
    version: &mut AccurateRipVersionResult,
    checksum: u32,
    confidence: u8,
) -> bool {
    if version.crc == Some(checksum)
        && version.db_confidence.is_none_or(|current| confidence > current)
    {
        version.db_crc = Some(checksum);
        version.db_confidence = Some(confidence);
        return true;
    }
    false
}

fn match_responses(tracks: &mut [&mut TrackResult], responses: &[&AccurateRipResponse]) -> bool {
    for response in responses {
        for (position, track) in tracks.iter_mut().enumerate() {
            let Some(entry) = response.tracks.get(position) else {
                continue;
            };
            let number = track.number;
            for (name, version) in [("v1", &mut track.ar.v1), ("v2", &mut track.ar.v2)] {
                if match_version(version, entry.checksum, entry.confidence) {
                    debug!(
                        "Track {} matched response {} in AccurateRip database: {name} crc {:08x} confidence {}",
                        number,
                        response.cddb_disc_id_hex(),
                        entry.checksum,
                        entry.confidence
                    );
                }
            }
        }
    }

    let mut accurate = true;
    for track in tracks.iter_mut() {
        track.accurip = track.ar.matched();
        accurate &= track.accurip;
    }
    accurate
}

fn hex(value: Option<u32>) -> String {
    value.map_or_else(|| "None".to_string(), |value| format!("{value:08x}"))
}

/// One line per track summarising its AccurateRip verification.
pub fn report_lines(result: &RipResult) -> Vec<String> {
    let mut lines = Vec::with_capacity(result.tracks.len());

    for track in &result.tracks {
        if track.number == 0 {
            lines.push("track  0: unknown          (not tracked)".to_string());
            continue;
        }

        let ar = &track.ar;
        if ar.v1.crc.is_none() && ar.v2.crc.is_none() {
            error!("No track AR CRC on non-HTOA track {}", track.number);
            lines.push(format!("track {:2}: unknown          (error)", track.number));
            continue;
        }

        let mut status = "rip NOT accurate";
        let mut conf = "(not found)".to_string();
        let mut db = "notfound".to_string();

        if let Some(max_confidence) = ar.db_max_confidence {
            db = hex(ar.db_max_confidence_crc);
            conf = format!("(max confidence    {max_confidence:3})");

            if ar.matched() {
                status = "rip accurate";
                db = [ar.v1.db_crc, ar.v2.db_crc]
                    .into_iter()
                    .flatten()
                    .map(|crc| format!("{crc:08x}"))
                    .collect::<Vec<_>>()
                    .join(", ");
            }

            let matched_confidence = ar.v1.db_confidence.max(ar.v2.db_confidence);
            if let Some(confidence) = matched_confidence
                && confidence > 0
                && confidence < max_confidence
            {
                conf = format!("(confidence {confidence:3} of {max_confidence:3})");
            }
        }

        lines.push(format!(
            "track {:2}: {status:<16} {conf:<23} v1 [{}], v2 [{}], DB [{db}]",
            track.number,
            hex(ar.v1.crc),
            hex(ar.v2.crc)
        ));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accurip::response::tests::two_pressings;
    use crate::image::table::Table;
    use crate::result::AccurateRipTrackResult;

    fn two_tracks() -> RipResult {
        let mut result = RipResult::new(Table::default());
        result.tracks.push(TrackResult::new(1));
        result.tracks.push(TrackResult::new(2));
        result
    }

    fn sums(v1: u32, v2: u32) -> Option<TrackChecksums> {
        Some(TrackChecksums { v1, v2 })
    }

    fn matching_checksums() -> Vec<Option<TrackChecksums>> {
        vec![sums(0x284fc705, 0xdc77f9ab), sums(0x9cc1f32e, 0xdd97d2c3)]
    }

    #[test]
    fn empty_inputs_are_not_accurate() {
        let responses = two_pressings();
        assert!(!verify_result(&mut RipResult::new(Table::default()), &responses, &matching_checksums()));
        assert!(!verify_result(&mut two_tracks(), &[], &matching_checksums()));
        assert!(!verify_result(&mut two_tracks(), &responses, &[]));
    }

    #[test]
    fn wrong_checksums_are_not_accurate() {
        let mut result = two_tracks();
        let checksums = vec![sums(0xdeadbeef, 0x76543210), sums(0x89abcdef, 0x01234567)];

        assert!(!verify_result(&mut result, &two_pressings(), &checksums));
        let ar = &result.tracks[0].ar;
        assert_eq!(ar.db_max_confidence, Some(12));
        assert_eq!(ar.db_max_confidence_crc, Some(0x284fc705));
        assert_eq!(ar.v1.db_crc, None);
        assert!(!result.tracks[0].accurip);
    }

    #[test]
    fn stores_accuraterip_results_on_tracks() {
        let mut result = two_tracks();
        assert!(verify_result(&mut result, &two_pressings(), &matching_checksums()));

        assert_eq!(
            result.tracks[0].ar,
            AccurateRipTrackResult {
                v1: AccurateRipVersionResult {
                    crc: Some(0x284fc705),
                    db_crc: Some(0x284fc705),
                    db_confidence: Some(12),
                },
                v2: AccurateRipVersionResult {
                    crc: Some(0xdc77f9ab),
                    db_crc: Some(0xdc77f9ab),
                    db_confidence: Some(4),
                },
                db_max_confidence: Some(12),
                db_max_confidence_crc: Some(0x284fc705),
            }
        );
        assert_eq!(result.tracks[1].ar.db_max_confidence, Some(20));
        assert_eq!(result.tracks[1].ar.v1.db_confidence, Some(20));
        assert!(result.tracks.iter().all(|t| t.accurip));
    }

    #[test]
    fn matches_only_v1_or_only_v2_responses() {
        let responses = two_pressings();
        assert!(verify_result(&mut two_tracks(), &responses[..1], &matching_checksums()));
        assert!(verify_result(&mut two_tracks(), &responses[1..], &matching_checksums()));
    }

    #[test]
    fn tracks_may_match_under_different_versions() {
        let mut result = two_tracks();
        let checksums = vec![sums(0x284fc705, 0), sums(0, 0xdd97d2c3)];
        assert!(verify_result(&mut result, &two_pressings(), &checksums));
        assert_eq!(result.tracks[1].ar.v1.db_crc, None);
        assert_eq!(result.tracks[1].ar.v2.db_crc, Some(0xdd97d2c3));
    }

    #[test]
    fn htoa_is_ignored() {
        let mut result = two_tracks();
        result.tracks.insert(0, TrackResult::new(0));
        assert!(verify_result(&mut result, &two_pressings(), &matching_checksums()));
        assert_eq!(result.tracks[0].ar, AccurateRipTrackResult::default());
    }

    #[test]
    fn responses_for_other_track_counts_are_skipped() {
        let mut result = two_tracks();
        result.tracks.push(TrackResult::new(3));
        let mut checksums = matching_checksums();
        checksums.push(sums(1, 2));

        assert!(!verify_result(&mut result, &two_pressings(), &checksums));
        assert_eq!(result.tracks[0].ar.v1.crc, Some(0x284fc705));
        assert_eq!(result.tracks[2].ar.v2.crc, Some(2));
        assert_eq!(result.tracks[0].ar.db_max_confidence, None);
        assert_eq!(
            report_lines(&result)[2],
            "track  3: rip NOT accurate (not found)             v1 [00000001], v2 [00000002], DB [notfound]"
        );
    }

    #[test]
    fn disc_missing_from_database_keeps_local_checksums() {
        let mut result = two_tracks();
        assert!(!verify_result(&mut result, &[], &matching_checksums()));

        assert_eq!(result.tracks[0].ar.v1.crc, Some(0x284fc705));
        assert_eq!(result.tracks[1].ar.v2.crc, Some(0xdd97d2c3));
        assert!(!result.tracks[0].accurip);
        assert_eq!(
            report_lines(&result),
            vec![
                "track  1: rip NOT accurate (not found)             v1 [284fc705], v2 [dc77f9ab], DB [notfound]",
                "track  2: rip NOT accurate (not found)             v1 [9cc1f32e], v2 [dd97d2c3], DB [notfound]",
            ]
        );
    }

    #[test]
    fn unreadable_track_still_reports_error() {
        let mut result = two_tracks();
        assert!(!verify_result(&mut result, &[], &[sums(0x284fc705, 0xdc77f9ab), None]));
        assert_eq!(report_lines(&result)[1], "track  2: unknown          (error)");
    }

    fn reported() -> RipResult {
        let mut result = RipResult::new(Table::default());
        let mut track = TrackResult::new(1);
        track.ar = AccurateRipTrackResult {
            v1: AccurateRipVersionResult {
                crc: Some(0x284fc705),
                db_crc: Some(0x284fc705),
                db_confidence: Some(12),
            },
            v2: AccurateRipVersionResult {
                crc: Some(0xdc77f9ab),
                db_crc: Some(0xdc77f9ab),
                db_confidence: Some(4),
            },
            db_max_confidence: Some(12),
            db_max_confidence_crc: Some(0x284fc705),
        };
        result.tracks.push(track);
        result
    }

    #[test]
    fn report_without_local_checksum() {
        let mut result = reported();
        result.tracks[0] = TrackResult::new(1);
        assert_eq!(report_lines(&result), vec!["track  1: unknown          (error)"]);
    }

    #[test]
    fn report_track_not_found() {
        let mut result = reported();
        result.tracks[0].ar.db_max_confidence = None;
        assert_eq!(
            report_lines(&result),
            vec![
                "track  1: rip NOT accurate (not found)             v1 [284fc705], v2 [dc77f9ab], DB [notfound]"
            ]
        );
    }

    #[test]
    fn report_htoa_not_tracked() {
        let mut result = reported();
        result.tracks[0].number = 0;
        assert_eq!(report_lines(&result), vec!["track  0: unknown          (not tracked)"]);
    }

    #[test]
    fn report_v1_only() {
        let mut result = reported();
        result.tracks[0].ar.v2.db_crc = None;
        result.tracks[0].ar.v2.db_confidence = None;
        assert_eq!(
            report_lines(&result),
            vec![
                "track  1: rip accurate     (max confidence     12) v1 [284fc705], v2 [dc77f9ab], DB [284fc705]"
            ]
        );
    }

    #[test]
    fn report_v2_only() {
        let mut result = reported();
        result.tracks[0].ar.v1.db_crc = None;
        result.tracks[0].ar.v1.db_confidence = None;
        assert_eq!(
            report_lines(&result),
            vec![
                "track  1: rip accurate     (confidence   4 of  12) v1 [284fc705], v2 [dc77f9ab], DB [dc77f9ab]"
            ]
        );
    }

    #[test]
    fn report_both_versions() {
        assert_eq!(
            report_lines(&reported()),
            vec![
                "track  1: rip accurate     (max confidence     12) v1 [284fc705], v2 [dc77f9ab], DB [284fc705, dc77f9ab]"
            ]
        );

        let mut result = reported();
        result.tracks[0].ar.db_max_confidence = Some(66);
        assert_eq!(
            report_lines(&result),
            vec![
                "track  1: rip accurate     (confidence  12 of  66) v1 [284fc705], v2 [dc77f9ab], DB [284fc705, dc77f9ab]"
            ]
        );
    }
}

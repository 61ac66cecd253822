use crate::cd::FRAMES_PER_SECOND;
use crate::image::error::{ImageError, ImageResult};
use crate::image::table::{Index, Table, Track};
use crate::image::{Message, source_track_length};
use crate::util::path::real_path;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref REM_RE: Regex = Regex::new(r"^REM\s(\w+)\s(.*)$").unwrap();
    static ref CATALOG_RE: Regex = Regex::new(r"^CATALOG\s(\d+)$").unwrap();
    static ref PERFORMER_RE: Regex = Regex::new(r#"^(\s*)PERFORMER\s"?(.*?)"?$"#).unwrap();
    static ref TITLE_RE: Regex = Regex::new(r#"^(\s*)TITLE\s"?(.*?)"?$"#).unwrap();
    static ref FILE_RE: Regex = Regex::new(r#"^FILE\s+"(.*)"\s+(\w+)$"#).unwrap();
    static ref TRACK_RE: Regex = Regex::new(r"^\s+TRACK\s+(\d\d)\s+(.+)$").unwrap();
    static ref ISRC_RE: Regex = Regex::new(r"^\s+ISRC\s+(\w+)$").unwrap();
    static ref FLAGS_RE: Regex = Regex::new(r"^\s+FLAGS\s+(.+)$").unwrap();
    static ref PREGAP_RE: Regex = Regex::new(r"^\s+PREGAP\s+(\d\d):(\d\d):(\d\d)$").unwrap();
    static ref INDEX_RE: Regex =
        Regex::new(r"^\s+INDEX\s+(\d\d)\s+(\d\d):(\d\d):(\d\d)$").unwrap();
}

#[derive(Debug, Clone)]
pub struct CueFile {
    pub path: PathBuf,
    pub table: Table,
    /// `REM` entries from the header.
    pub rems: BTreeMap<String, String>,
    pub messages: Vec<Message>,
}

impl CueFile {
    /// `None` for the last track or when the next track lives in another
    /// file; the whole file should be assumed then.
    pub fn track_length(&self, number: u8) -> Option<u32> {
        source_track_length(&self.table, number)
    }

    pub fn real_path(&self, file: &str) -> ImageResult<PathBuf> {
        real_path(&self.path, file).ok_or_else(|| ImageError::FileNotFound(file.to_string()))
    }
}

pub struct CueParser {
    cue_path: PathBuf,
}

impl CueParser {
    pub fn new(cue_path: impl AsRef<Path>) -> Self {
        Self {
            cue_path: cue_path.as_ref().to_path_buf(),
        }
    }

    pub async fn parse(&self) -> ImageResult<CueFile> {
        info!("Parsing .cue file {}", self.cue_path.display());
        let data = tokio::fs::read(&self.cue_path).await?;
        let content = String::from_utf8_lossy(&data);
        Ok(self.parse_str(&content))
    }

    pub fn parse_str(&self, content: &str) -> CueFile {
        let mut table = Table::default();
        let mut rems = BTreeMap::new();
        let mut messages = Vec::new();

        let mut in_header = true;
        let mut current_file: Option<String> = None;
        let mut counter = 0u32;
        // silent pregap of track 1, not backed by the file
        let mut pregap = 0u32;

        let mut message = |number: usize, text: String| {
            warn!("{}:{}: {text}", self.cue_path.display(), number + 1);
            messages.push((number + 1, text));
        };

        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end_matches(['\r', '\n', ' ', '\t']);

            if let Some(caps) = REM_RE.captures(line) {
                if in_header {
                    rems.insert(caps[1].to_string(), caps[2].to_string());
                } else {
                    message(number, format!("REM {} outside of header", &caps[1]));
                }
                continue;
            }

            if let Some(caps) = CATALOG_RE.captures(line) {
                table.catalog = Some(caps[1].to_string());
                continue;
            }

            if let Some(caps) = PERFORMER_RE.captures(line) {
                cdtext(&mut table, in_header, "PERFORMER", &caps[2]);
                continue;
            }

            if let Some(caps) = TITLE_RE.captures(line) {
                cdtext(&mut table, in_header, "TITLE", &caps[2]);
                continue;
            }

            if let Some(caps) = FILE_RE.captures(line) {
                counter += 1;
                current_file = Some(caps[1].to_string());
                debug!("Found file {} ({}), counter {counter}", &caps[1], &caps[2]);
                continue;
            }

            if let Some(caps) = TRACK_RE.captures(line) {
                if current_file.is_none() {
                    message(number, "TRACK without preceding FILE".to_string());
                    continue;
                }

                in_header = false;
                let Ok(track_number) = caps[1].parse::<u8>() else {
                    message(number, format!("Invalid track number {}", &caps[1]));
                    continue;
                };
                debug!("Found track {track_number}");
                table
                    .tracks
                    .push(Track::new(track_number, &caps[2] == "AUDIO", 1));
                continue;
            }

            if let Some(caps) = ISRC_RE.captures(line) {
                if let Some(track) = table.tracks.last_mut() {
                    track.isrc = Some(caps[1].to_string());
                }
                continue;
            }

            if let Some(caps) = FLAGS_RE.captures(line) {
                if let Some(track) = table.tracks.last_mut() {
                    track.pre_emphasis = caps[1].split_whitespace().any(|flag| flag == "PRE");
                }
                continue;
            }

            if let Some(caps) = PREGAP_RE.captures(line) {
                let length = frames(&caps[1], &caps[2], &caps[3]);
                match table.tracks.last_mut() {
                    Some(track) if track.number == 1 => {
                        pregap = length;
                        track.set_index(Index::new(0, Some(0), None, Some(0), Some(0)));
                    }
                    Some(track) => message(
                        number,
                        format!("PREGAP on track {} is not supported", track.number),
                    ),
                    None => message(number, "PREGAP without preceding TRACK".to_string()),
                }
                continue;
            }

            if let Some(caps) = INDEX_RE.captures(line) {
                let Some(track) = table.tracks.last_mut() else {
                    message(number, "INDEX without preceding TRACK".to_string());
                    continue;
                };

                let Ok(index_number) = caps[1].parse::<u8>() else {
                    continue;
                };
                let relative = frames(&caps[2], &caps[3], &caps[4]);
                // only a silent track 1 pregap pins down absolute offsets
                let absolute = (track.number == 1 && pregap > 0 && counter == 1)
                    .then_some(pregap + relative);

                debug!(
                    "Found index {index_number} of track {} in {:?}:{relative}",
                    track.number, current_file
                );
                track.set_index(Index::new(
                    index_number,
                    absolute,
                    current_file.clone(),
                    Some(relative),
                    Some(counter),
                ));
            }
        }

        CueFile {
            path: self.cue_path.clone(),
            table,
            rems,
            messages,
        }
    }
}

fn cdtext(table: &mut Table, in_header: bool, key: &str, value: &str) {
    let map = if in_header {
        &mut table.cdtext
    } else {
        match table.tracks.last_mut() {
            Some(track) => &mut track.cdtext,
            None => return,
        }
    };
    map.insert(key.to_string(), value.to_string());
}

fn frames(minutes: &str, seconds: &str, frames: &str) -> u32 {
    // the regexes only admit two decimal digits
    let minutes: u32 = minutes.parse().unwrap_or(0);
    let seconds: u32 = seconds.parse().unwrap_or(0);
    let frames: u32 = frames.parse().unwrap_or(0);
    frames + seconds * FRAMES_PER_SECOND + minutes * FRAMES_PER_SECOND * 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::toc::tests::sample;

    const KANYE_CUE: &str = r#"REM DISCID AD0BE00D
REM COMMENT "ExactAudioCopy v0.99pb4"
PERFORMER "Kanye West"
TITLE "Graduation"
FILE "track01.wav" WAVE
  TRACK 01 AUDIO
    TITLE "Good Morning"
    INDEX 01 00:00:00
FILE "track02.wav" WAVE
  TRACK 02 AUDIO
    ISRC USUM70711567
    INDEX 00 00:00:00
    INDEX 01 00:00:32
FILE "data.wav" WAVE
  TRACK 03 AUDIO
    FLAGS DCP PRE
    INDEX 01 00:00:00
  TRACK 04 AUDIO
    INDEX 01 03:45:10
"#;

    fn parse(text: &str) -> CueFile {
        CueParser::new("disc.cue").parse_str(text)
    }

    #[test]
    fn parses_header_rems_and_cdtext() {
        let cue = parse(KANYE_CUE);
        assert_eq!(cue.rems.get("DISCID").map(String::as_str), Some("AD0BE00D"));
        assert_eq!(
            cue.rems.get("COMMENT").map(String::as_str),
            Some("\"ExactAudioCopy v0.99pb4\"")
        );
        assert_eq!(cue.table.cdtext.get("TITLE").map(String::as_str), Some("Graduation"));
        assert_eq!(
            cue.table.track(1).unwrap().cdtext.get("TITLE").map(String::as_str),
            Some("Good Morning")
        );
        assert!(cue.messages.is_empty());
    }

    #[test]
    fn indexes_carry_file_and_counter() {
        let cue = parse(KANYE_CUE);
        assert_eq!(cue.table.tracks.len(), 4);

        let two = cue.table.track(2).unwrap();
        assert_eq!(two.isrc.as_deref(), Some("USUM70711567"));
        assert_eq!(
            two.index(1).unwrap(),
            &Index::new(1, None, Some("track02.wav".to_string()), Some(32), Some(2))
        );

        let four = cue.table.track(4).unwrap().index(1).unwrap();
        assert_eq!(four.counter, Some(3));
        assert_eq!(four.relative, Some(3 * 60 * 75 + 45 * 75 + 10));
        assert!(cue.table.track(3).unwrap().pre_emphasis);
    }

    #[test]
    fn track_length_needs_shared_file() {
        let cue = parse(KANYE_CUE);
        assert_eq!(cue.track_length(1), None);
        assert_eq!(cue.track_length(3), Some(3 * 60 * 75 + 45 * 75 + 10));
        assert_eq!(cue.track_length(4), None);
    }

    #[test]
    fn reports_misplaced_lines() {
        let text = "  TRACK 01 AUDIO\nFILE \"a.wav\" WAVE\n    INDEX 01 00:00:00\n  TRACK 01 AUDIO\nREM LATE entry\n";
        let cue = parse(text);
        assert_eq!(
            cue.messages,
            vec![
                (1, "TRACK without preceding FILE".to_string()),
                (3, "INDEX without preceding TRACK".to_string()),
                (5, "REM LATE outside of header".to_string()),
            ]
        );
        assert_eq!(cue.table.tracks.len(), 1);
    }

    #[test]
    fn own_cue_round_trips_identifiers() {
        let original = sample().table;
        let text = original.cue("disc.cue", "cdrip").unwrap();

        let mut parsed = parse(&text).table;
        assert!(!parsed.has_toc());
        parsed.absolutize().unwrap();
        parsed.leadout = original.leadout;

        assert!(parsed.has_toc());
        assert_eq!(parsed.cddb_disc_id().unwrap(), original.cddb_disc_id().unwrap());
        assert_eq!(parsed.accuraterip_ids().unwrap(), original.accuraterip_ids().unwrap());
        assert_eq!(parsed.catalog, original.catalog);
        assert_eq!(parsed.cue("disc.cue", "cdrip").unwrap(), text);
    }

    #[test]
    fn real_path_reports_missing_file() {
        let cue = parse(KANYE_CUE);
        assert!(matches!(
            cue.real_path("track01.wav"),
            Err(ImageError::FileNotFound(_))
        ));
    }
}

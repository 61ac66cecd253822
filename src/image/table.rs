use crate::cd::{FRAMES_PER_SECOND, frames_to_msf};
use crate::image::error::{TableError, TableResult};
use crate::util::path::relative_path;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CD-Text keys understood in .toc files and written to cue sheets.
pub const CDTEXT_FIELDS: [&str; 13] = [
    "ARRANGER",
    "COMPOSER",
    "DISCID",
    "GENRE",
    "MESSAGE",
    "ISRC",
    "PERFORMER",
    "SIZE_INFO",
    "SONGWRITER",
    "TITLE",
    "TOC_INFO",
    "TOC_INFO2",
    "UPC_EAN",
];

/// Frames lost between sessions: lead-out, lead-in and the new pregap, as
/// cdrecord lays them out. The second session pays a longer lead-out.
pub const fn session_gap(session: u32) -> u32 {
    if session <= 2 { 11400 } else { 6900 }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub number: u8,
    /// Frames from the start of the disc.
    pub absolute: Option<u32>,
    /// Frames from the start of the backing source.
    pub relative: Option<u32>,
    pub path: Option<String>,
    /// Identifies one contiguous backing source: a file or a run of silence.
    pub counter: Option<u32>,
}

impl Index {
    pub fn new(
        number: u8,
        absolute: Option<u32>,
        path: Option<String>,
        relative: Option<u32>,
        counter: Option<u32>,
    ) -> Self {
        Self {
            number,
            absolute,
            relative,
            path,
            counter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub number: u8,
    pub audio: bool,
    pub indexes: BTreeMap<u8, Index>,
    pub isrc: Option<String>,
    pub cdtext: BTreeMap<String, String>,
    pub session: u32,
    pub pre_emphasis: bool,
}

impl Track {
    pub fn new(number: u8, audio: bool, session: u32) -> Self {
        Self {
            number,
            audio,
            indexes: BTreeMap::new(),
            isrc: None,
            cdtext: BTreeMap::new(),
            session,
            pre_emphasis: false,
        }
    }

    pub fn index(&self, number: u8) -> TableResult<&Index> {
        self.indexes.get(&number).ok_or(TableError::MissingIndex {
            track: self.number,
            index: number,
        })
    }

    pub fn index_mut(&mut self, number: u8) -> TableResult<&mut Index> {
        self.indexes.get_mut(&number).ok_or(TableError::MissingIndex {
            track: self.number,
            index: number,
        })
    }

    pub fn set_index(&mut self, index: Index) {
        self.indexes.insert(index.number, index);
    }

    pub fn first_index(&self) -> Option<&Index> {
        self.indexes.values().next()
    }

    pub fn last_index(&self) -> Option<&Index> {
        self.indexes.values().next_back()
    }

    /// Frames between index 0 and index 1; 0 without an index 0.
    pub fn pregap(&self) -> u32 {
        let one = self.indexes.get(&1).and_then(|index| index.absolute);
        let zero = self.indexes.get(&0).and_then(|index| index.absolute);
        match (zero, one) {
            (Some(zero), Some(one)) => one.saturating_sub(zero),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub tracks: Vec<Track>,
    /// First frame after the playable area.
    pub leadout: Option<u32>,
    pub catalog: Option<String>,
    pub cdtext: BTreeMap<String, String>,
}

impl Table {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    pub fn track(&self, number: u8) -> TableResult<&Track> {
        (number as usize)
            .checked_sub(1)
            .and_then(|position| self.tracks.get(position))
            .ok_or(TableError::NoSuchTrack(number))
    }

    pub fn track_mut(&mut self, number: u8) -> TableResult<&mut Track> {
        (number as usize)
            .checked_sub(1)
            .and_then(|position| self.tracks.get_mut(position))
            .ok_or(TableError::NoSuchTrack(number))
    }

    pub fn track_start(&self, number: u8) -> TableResult<u32> {
        self.track(number)?
            .index(1)?
            .absolute
            .ok_or(TableError::MissingAbsolute {
                track: number,
                index: 1,
            })
    }

    /// Last frame of a track, excluding the lead-in/out of a following
    /// session.
    pub fn track_end(&self, number: u8) -> TableResult<u32> {
        let track = self.track(number)?;

        if number as usize == self.tracks.len() {
            let leadout = self.leadout.ok_or(TableError::NoToc)?;
            return Ok(leadout.saturating_sub(1));
        }

        let next = self.track(number + 1)?;
        let mut end = self.track_start(number + 1)?.saturating_sub(1);
        if next.session > track.session {
            let gap = session_gap(next.session);
            debug!("Subtracting session gap {gap} from track {number} end");
            end = end.saturating_sub(gap);
        }

        Ok(end)
    }

    pub fn track_length(&self, number: u8) -> TableResult<u32> {
        Ok(self.track_end(number)? - self.track_start(number)? + 1)
    }

    pub fn audio_track_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.audio).count()
    }

    pub fn has_data_tracks(&self) -> bool {
        self.tracks.iter().any(|track| !track.audio)
    }

    /// Leadout is set and every track has an absolute index 1.
    pub fn has_toc(&self) -> bool {
        self.leadout.is_some()
            && self.tracks.iter().all(|track| {
                track
                    .indexes
                    .get(&1)
                    .is_some_and(|index| index.absolute.is_some())
            })
    }

    pub fn can_cue(&self) -> bool {
        self.has_toc()
            && self.tracks.iter().all(|track| {
                track
                    .indexes
                    .values()
                    .all(|index| index.relative.is_some())
            })
    }

    /// Frames in the audio (or data) tracks, from track 1 index 1.
    pub fn frame_length(&self, data: bool) -> TableResult<u32> {
        let mut end = None;
        for track in self.tracks.iter().rev() {
            if track.audio != data {
                end = Some(self.track_end(track.number)?);
                break;
            }
        }

        match end {
            Some(end) => Ok(end - self.track_start(1)? + 1),
            None => Ok(0),
        }
    }

    pub fn duration_ms(&self) -> TableResult<u64> {
        Ok(self.frame_length(false)? as u64 * 1000 / FRAMES_PER_SECOND as u64)
    }

    /// `(start, stop)` frames of hidden track one audio, if track 1 has a
    /// pregap.
    pub fn htoa(&self) -> TableResult<Option<(u32, u32)>> {
        let track = self.track(1)?;
        if !track.indexes.contains_key(&0) {
            return Ok(None);
        }

        let start = track.index(0)?.absolute.ok_or(TableError::MissingAbsolute {
            track: 1,
            index: 0,
        })?;
        let stop = self.track_start(1)?.saturating_sub(1);

        Ok(Some((start, stop)))
    }

    /// The index after `(track, index)`, crossing into the next track.
    pub fn next_track_index(&self, track: u8, index: u8) -> TableResult<(u8, u8)> {
        let current = self.track(track)?;
        if let Some((&number, _)) = current.indexes.range(index.saturating_add(1)..).next() {
            return Ok((track, number));
        }

        let next = self
            .track(track + 1)
            .map_err(|_| TableError::EndOfDisc { track, index })?;
        match next.first_index() {
            Some(first) => Ok((next.number, first.number)),
            None => Err(TableError::EndOfDisc { track, index }),
        }
    }

    /// Overlays a ripped file starting at `(track, index)` and spanning
    /// `length` frames onto every index it covers.
    pub fn set_file(
        &mut self,
        track: u8,
        index: u8,
        path: Option<&str>,
        length: u32,
        counter: Option<u32>,
    ) -> TableResult<()> {
        debug!("Setting track {track}, index {index}, to {path:?} with length {length} frames");

        let start = self
            .track(track)?
            .index(index)?
            .absolute
            .ok_or(TableError::MissingAbsolute { track, index })?;
        let end = start as u64 + length as u64;

        let (mut t, mut i) = (track, index);
        loop {
            let entry = self.track_mut(t)?.index_mut(i)?;
            let Some(absolute) = entry.absolute else {
                break;
            };
            if absolute as u64 >= end {
                break;
            }

            debug!("Setting path {path:?}, relative {} on track {t}, index {i}", absolute - start);
            entry.path = path.map(str::to_string);
            entry.relative = Some(absolute - start);
            entry.counter = counter;

            match self.next_track_index(t, i) {
                Ok((next_t, next_i)) => {
                    t = next_t;
                    i = next_i;
                }
                Err(TableError::EndOfDisc { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    pub fn clear_files(&mut self) {
        for track in &mut self.tracks {
            for index in track.indexes.values_mut() {
                index.path = None;
                index.relative = None;
            }
        }
    }

    /// Derives absolute offsets from relative ones for every index backed by
    /// the same source as the start of track 1.
    ///
    /// A silent track 1 pregap is skipped; when the first backed index already
    /// carries an absolute offset, the rest of the chain is shifted by it.
    pub fn absolutize(&mut self) -> TableResult<()> {
        let first = self.track(1)?;
        let Some(head) = first.first_index() else {
            return Err(TableError::MissingIndex { track: 1, index: 1 });
        };

        let (mut t, mut i) = (1u8, head.number);
        if head.path.is_none() && head.absolute.is_some() && head.number == 0 {
            i = 1;
        }

        let head = self.track(t)?.index(i)?;
        let counter = head.counter;
        let shift = match (head.absolute, head.relative) {
            (Some(absolute), Some(relative)) => absolute as i64 - relative as i64,
            _ => 0,
        };

        loop {
            let entry = self.track_mut(t)?.index_mut(i)?;
            if entry.counter.is_none() || entry.counter != counter {
                break;
            }
            let Some(relative) = entry.relative else {
                break;
            };

            let wanted = (relative as i64 + shift).max(0) as u32;
            if let Some(absolute) = entry.absolute
                && absolute != wanted
            {
                return Err(TableError::AbsoluteConflict {
                    track: t,
                    index: i,
                    absolute,
                    relative: wanted,
                });
            }
            entry.absolute = Some(wanted);

            match self.next_track_index(t, i) {
                Ok((next_t, next_i)) => {
                    t = next_t;
                    i = next_i;
                }
                Err(TableError::EndOfDisc { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Appends the tracks of a later session.
    pub fn merge(&mut self, other: &Table, session: u32) -> TableResult<()> {
        let gap = session_gap(session);
        let leadout = self.leadout.ok_or(TableError::NoToc)?;
        let other_leadout = other.leadout.ok_or(TableError::NoToc)?;
        debug!("Merging session {session}, gap {gap}, leadout {leadout}");

        let last_counter = self
            .tracks
            .last()
            .and_then(Track::last_index)
            .and_then(|index| index.counter)
            .unwrap_or(0);

        for source in &other.tracks {
            let mut track = source.clone();
            track.number = self.tracks.len() as u8 + 1;
            track.session = session;
            for index in track.indexes.values_mut() {
                index.absolute = index.absolute.map(|absolute| absolute + leadout + gap);
                index.counter = index.counter.map(|counter| counter + last_counter);
            }
            self.tracks.push(track);
        }

        self.leadout = Some(leadout + other_leadout + gap);
        Ok(())
    }

    /// Writes the table as cue sheet text. File references are made relative
    /// to `cue_path`; `program` ends up in the `REM COMMENT` line.
    pub fn cue(&self, cue_path: &str, program: &str) -> TableResult<String> {
        if !self.can_cue() {
            return Err(TableError::CannotCue);
        }

        let mut lines = Vec::new();

        for key in CDTEXT_FIELDS {
            if key == "PERFORMER" || key == "TITLE" {
                continue;
            }
            if let Some(value) = self.cdtext.get(key) {
                lines.push(format!("    {key} {value}"));
            }
        }

        lines.push(format!("REM DISCID {}", self.cddb_disc_id()?.to_string().to_uppercase()));
        lines.push(format!("REM COMMENT \"{program}\""));

        if let Some(catalog) = &self.catalog {
            lines.push(format!("CATALOG {catalog}"));
        }

        for key in ["PERFORMER", "TITLE"] {
            if let Some(value) = self.cdtext.get(key) {
                lines.push(format!("{key} \"{value}\""));
            }
        }

        let first_track = self.track(1)?;
        let index_one = first_track.index(1)?;
        let Some(mut index) = first_track.first_index() else {
            return Err(TableError::MissingIndex { track: 1, index: 1 });
        };
        let (mut t, mut i) = (1u8, index.number);
        let mut counter = index.counter;
        while index.path.is_none() {
            (t, i) = self.next_track_index(t, i)?;
            index = self.track(t)?.index(i)?;
            counter = index.counter;
        }

        let write_file = |lines: &mut Vec<String>, path: &str| {
            lines.push(format!("FILE \"{}\" WAVE", relative_path(path, cue_path)));
        };
        if let Some(path) = &index.path {
            write_file(&mut lines, path);
        }

        for (position, track) in self.tracks.iter().enumerate() {
            if !track.audio {
                continue;
            }

            let mut wrote_track = false;
            for (&number, index) in &track.indexes {
                if index.counter.unwrap_or(0) > counter.unwrap_or(0) {
                    if let Some(path) = &index.path {
                        write_file(&mut lines, path);
                    }
                    counter = index.counter;
                }

                if !wrote_track {
                    wrote_track = true;
                    lines.push(format!("  TRACK {:02} AUDIO", position + 1));

                    for key in CDTEXT_FIELDS {
                        if let Some(value) = track.cdtext.get(key) {
                            lines.push(format!("    {key} \"{value}\""));
                        }
                    }
                    if let Some(isrc) = &track.isrc {
                        lines.push(format!("    ISRC {isrc}"));
                    }
                    if track.pre_emphasis {
                        lines.push("    FLAGS PRE".to_string());
                    }

                    if let Some(index_zero) = track.indexes.get(&0) {
                        if position == 0 && index_zero.path.is_none() {
                            let one = index_one.absolute.unwrap_or(0);
                            let zero = index_zero.absolute.unwrap_or(0);
                            lines.push(format!("    PREGAP {}", frames_to_msf(one - zero)));
                            continue;
                        }
                        lines.push(format!(
                            "    INDEX 00 {}",
                            frames_to_msf(index_zero.relative.unwrap_or(0))
                        ));
                    }
                }

                if number > 0 {
                    lines.push(format!(
                        "    INDEX {number:02} {}",
                        frames_to_msf(index.relative.unwrap_or(0))
                    ));
                }
            }

            if !wrote_track {
                warn!("Track {} has no indexes, left out of cue sheet", track.number);
            }
        }

        lines.push(String::new());
        Ok(lines.join("\n"))
    }
}

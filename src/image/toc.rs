//! cdrdao .toc files, as described in the cdrdao man page.

use crate::cd::msf_to_frames;
use crate::image::error::{ImageError, ImageResult};
use crate::image::table::{CDTEXT_FIELDS, Index, Table, Track};
use crate::image::{Message, source_track_length};
use crate::util::path::real_path;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref CDTEXT_CANDIDATE_RE: Regex = Regex::new(r#"(\w+) "(.+)""#).unwrap();
    static ref CATALOG_RE: Regex = Regex::new(r#"^CATALOG "(\d+)"$"#).unwrap();
    static ref PRE_EMPHASIS_RE: Regex = Regex::new(r"^PRE_EMPHASIS$").unwrap();
    static ref TRACK_RE: Regex = Regex::new(r"^TRACK\s(.+)$").unwrap();
    static ref ISRC_RE: Regex = Regex::new(r#"^ISRC "(\w+)"$"#).unwrap();
    // HTOA shows up as SILENCE
    static ref SILENCE_RE: Regex = Regex::new(r"^SILENCE\s(.*)$").unwrap();
    // pregap source when switching modes
    static ref ZERO_RE: Regex = Regex::new(r"^ZERO\s(.+)\s(.*)$").unwrap();
    static ref FILE_RE: Regex = Regex::new(r#"^FILE\s+"(.*)"\s+(.+)\s(.+)$"#).unwrap();
    static ref DATAFILE_RE: Regex = Regex::new(r#"^DATAFILE\s+"(.*)"\s+(\S+)\s*.*"#).unwrap();
    static ref START_RE: Regex = Regex::new(r"^START\s(.*)$").unwrap();
    static ref INDEX_RE: Regex = Regex::new(r"^INDEX\s(.+)$").unwrap();
}

/// One backing source: a file or a run of silence starting at an absolute
/// disc offset. Consecutive FILE entries for the same path share a counter.
#[derive(Debug, Clone)]
struct Source {
    counter: u32,
    offset: u32,
    path: Option<String>,
}

#[derive(Debug, Default)]
struct Sources {
    sources: Vec<Source>,
}

impl Sources {
    fn append(&mut self, counter: u32, offset: u32, path: Option<String>) {
        debug!("Appending source, counter {counter}, abs offset {offset}, source {path:?}");
        self.sources.push(Source {
            counter,
            offset,
            path,
        });
    }

    /// The source playing at `offset`, `None` before the first one.
    fn get(&self, offset: u32) -> Option<&Source> {
        match self.sources.iter().position(|source| offset < source.offset) {
            Some(0) => None,
            Some(position) => self.sources.get(position - 1),
            None => self.sources.last(),
        }
    }

    /// Absolute offset of the first source with this counter.
    fn counter_start(&self, counter: u32) -> u32 {
        self.sources
            .iter()
            .find(|source| source.counter == counter)
            .or(self.sources.last())
            .map(|source| source.offset)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Track,
}

/// Running totals while walking the TRACK records.
struct TocState {
    state: State,
    current_file: Option<String>,
    counter: u32,
    index_number: u8,
    /// Where the current track starts.
    absolute_offset: u32,
    /// Length of the current track as parsed so far.
    current_length: u32,
    /// Length of all completed tracks.
    total_length: u32,
    /// Pregap of the current track, added to its index 1.
    pregap_length: u32,
}

#[derive(Debug, Clone)]
pub struct TocFile {
    pub path: PathBuf,
    pub table: Table,
    pub messages: Vec<Message>,
}

impl TocFile {
    /// `None` for the last track or when the next track lives in another
    /// source.
    pub fn track_length(&self, number: u8) -> Option<u32> {
        source_track_length(&self.table, number)
    }

    pub fn real_path(&self, file: &str) -> ImageResult<PathBuf> {
        real_path(&self.path, file).ok_or_else(|| ImageError::FileNotFound(file.to_string()))
    }
}

pub struct TocParser {
    toc_path: PathBuf,
    table: Table,
    sources: Sources,
    messages: Vec<Message>,
}

impl TocParser {
    pub fn new(toc_path: impl AsRef<Path>) -> Self {
        Self {
            toc_path: toc_path.as_ref().to_path_buf(),
            table: Table::default(),
            sources: Sources::default(),
            messages: Vec::new(),
        }
    }

    pub async fn parse(self) -> ImageResult<TocFile> {
        let data = tokio::fs::read(&self.toc_path).await?;
        let content = String::from_utf8_lossy(&data);
        Ok(self.parse_str(&content))
    }

    pub fn parse_str(mut self, content: &str) -> TocFile {
        let mut st = TocState {
            state: State::Header,
            current_file: None,
            counter: 0,
            index_number: 0,
            absolute_offset: 0,
            current_length: 0,
            total_length: 0,
            pregap_length: 0,
        };

        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end();
            self.parse_line(&mut st, number, line);
        }

        // index 1 of the final track is still pending
        if !self.table.tracks.is_empty() {
            self.index_track(1, st.absolute_offset, st.pregap_length);
        }

        self.table.leadout = Some(st.total_length + st.current_length);
        debug!("Parsed {:?}, leadout {:?}", self.toc_path, self.table.leadout);

        TocFile {
            path: self.toc_path,
            table: self.table,
            messages: self.messages,
        }
    }

    fn parse_line(&mut self, st: &mut TocState, number: usize, line: &str) {
        if let Some(caps) = CDTEXT_CANDIDATE_RE.captures(line) {
            self.cdtext(st, &caps[1], &decode_escapes(&caps[2]));
        }

        if let Some(caps) = CATALOG_RE.captures(line) {
            self.table.catalog = Some(caps[1].to_string());
            debug!("Found catalog number {}", &caps[1]);
        }

        if let Some(caps) = TRACK_RE.captures(line) {
            st.state = State::Track;

            // deferred until the pregap of the previous track is known
            if !self.table.tracks.is_empty() {
                self.index_track(1, st.absolute_offset, st.pregap_length);
            }

            let mode = &caps[1];
            let track_number = self.table.tracks.len() as u8 + 1;
            self.table
                .tracks
                .push(Track::new(track_number, mode == "AUDIO", 1));

            st.absolute_offset += st.current_length;
            st.total_length += st.current_length;
            debug!(
                "Found track {track_number}, mode {mode}, at absolute offset {}",
                st.absolute_offset
            );

            st.current_length = 0;
            st.index_number = 1;
            st.pregap_length = 0;
            return;
        }

        if PRE_EMPHASIS_RE.is_match(line) {
            match self.table.tracks.last_mut() {
                Some(track) => track.pre_emphasis = true,
                None => self.message(number, "PRE_EMPHASIS without preceding TRACK"),
            }
        }

        if let Some(caps) = ISRC_RE.captures(line) {
            match self.table.tracks.last_mut() {
                Some(track) => track.isrc = Some(caps[1].to_string()),
                None => self.message(number, "ISRC without preceding TRACK"),
            }
        }

        if let Some(caps) = SILENCE_RE.captures(line)
            && let Some(length) = self.frames(number, &caps[1])
        {
            debug!("Silence of {length} frames");
            self.sources.append(st.counter, st.absolute_offset, None);
            if st.current_file.take().is_some() {
                st.counter += 1;
            }
            st.current_length += length;
        }

        if let Some(caps) = ZERO_RE.captures(line)
            && let Some(length) = self.frames(number, &caps[2])
        {
            if st.current_file.take().is_some() {
                st.counter += 1;
            }
            st.current_length += length;
        }

        if let Some(caps) = FILE_RE.captures(line)
            && let Some(start) = self.frames(number, &caps[2])
            && let Some(length) = self.frames(number, &caps[3])
        {
            debug!("File {}, start {start}, length {length}", &caps[1]);
            self.file(st, &caps[1], length);
        }

        if let Some(caps) = DATAFILE_RE.captures(line)
            && let Some(length) = self.frames(number, &caps[2])
        {
            debug!("Data file {}, length {length}", &caps[1]);
            self.file(st, &caps[1], length);
        }

        if let Some(caps) = START_RE.captures(line) {
            if self.table.tracks.is_empty() {
                self.message(number, "START without preceding TRACK");
                return;
            }

            if let Some(length) = self.frames(number, &caps[1]) {
                let absolute = st.absolute_offset;
                let (counter, path) = self.source_at(absolute);
                let relative = counter.map(|c| absolute - self.sources.counter_start(c));
                if let Some(track) = self.table.tracks.last_mut() {
                    track.set_index(Index::new(0, Some(absolute), path, relative, counter));
                }
                st.pregap_length = length;
            }
        }

        if let Some(caps) = INDEX_RE.captures(line) {
            if self.table.tracks.is_empty() {
                self.message(number, "INDEX without preceding TRACK");
                return;
            }

            if let Some(offset) = self.frames(number, &caps[1]) {
                st.index_number += 1;
                self.index_track(st.index_number, st.absolute_offset, offset);
            }
        }
    }

    fn cdtext(&mut self, st: &TocState, key: &str, value: &str) {
        if !CDTEXT_FIELDS.contains(&key) {
            return;
        }

        match st.state {
            State::Header => {
                debug!("Found disc CD-Text {key}: {value:?}");
                self.table.cdtext.insert(key.to_string(), value.to_string());
            }
            State::Track => {
                let Some(track) = self.table.tracks.last_mut() else {
                    return;
                };
                // a bare ISRC line is the track ISRC, not CD-Text
                if key != "ISRC" || track.isrc.is_some() {
                    debug!("Found track CD-Text {key}: {value:?}");
                    track.cdtext.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    fn file(&mut self, st: &mut TocState, path: &str, length: u32) {
        if st.current_file.as_deref() != Some(path) {
            st.counter += 1;
            debug!(
                "Track {}, switched to new file, increased counter to {}",
                self.table.tracks.len(),
                st.counter
            );
        }
        st.current_file = Some(path.to_string());
        self.sources.append(
            st.counter,
            st.absolute_offset + st.current_length,
            Some(path.to_string()),
        );
        st.current_length += length;
    }

    fn source_at(&self, absolute: u32) -> (Option<u32>, Option<String>) {
        match self.sources.get(absolute) {
            Some(source) => (Some(source.counter), source.path.clone()),
            None => (None, None),
        }
    }

    /// Adds index `number` to the current track at `track_offset` frames
    /// past its start.
    fn index_track(&mut self, number: u8, absolute_offset: u32, track_offset: u32) {
        let absolute = absolute_offset + track_offset;
        let (counter, path) = self.source_at(absolute);
        let relative = counter.map(|c| absolute - self.sources.counter_start(c));
        debug!("At abs offset {absolute}, in source {path:?}");

        if let Some(track) = self.table.tracks.last_mut() {
            track.set_index(Index::new(number, Some(absolute), path, relative, counter));
        }
    }

    fn frames(&mut self, number: usize, value: &str) -> Option<u32> {
        match msf_to_frames(value) {
            Ok(frames) => Some(frames),
            Err(e) => {
                self.message(number, &e.to_string());
                None
            }
        }
    }

    fn message(&mut self, number: usize, message: &str) {
        warn!("{}:{}: {message}", self.toc_path.display(), number + 1);
        self.messages.push((number + 1, message.to_string()));
    }
}

/// cdrdao writes CD-Text as latin-1 with octal escapes.
fn decode_escapes(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some(d) if d.is_digit(8) => {
                let mut code = 0u32;
                for _ in 0..3 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                decoded.push(char::from_u32(code & 0xff).unwrap_or('?'));
            }
            Some('n') => {
                chars.next();
                decoded.push('\n');
            }
            Some('t') => {
                chars.next();
                decoded.push('\t');
            }
            Some(e @ ('\\' | '"' | '\'')) => {
                chars.next();
                decoded.push(e);
            }
            _ => decoded.push('\\'),
        }
    }

    decoded
}

use crate::cd::{BYTES_PER_FRAME, FRAMES_PER_SECOND, WORDS_PER_FRAME, frames_to_hmsf};
use crate::image::error::TableResult;
use crate::image::table::Table;
use crate::program::AudioFormat;
use crate::program::checksum::Crc32Task;
use crate::program::flac::{EmbedPicture, EmbedPictureTask, FlacEncode, FlacEncodeTask, Tagging, TaggingTask};
use crate::program::sox::{PeakLevel, PeakLevelTask};
use crate::program::wav::WAV_HEADER_LENGTH;
use crate::task::error::{TaskError, TaskResult};
use crate::task::multi::{MultiSeparateTask, TaskList};
use crate::task::popen::{Exit, PopenTask, ProcessHandler, Stream};
use crate::task::{Task, TaskCore, TaskListener};
use crate::util::path::shrink_path;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempPath;

pub const CD_PARANOIA: &str = "cd-paranoia";

/// SCSI errors after which a read is given up.
const MAX_ERRORS: u32 = 100;

lazy_static! {
    // ##: 0 [read] @ 24696, offsets in words (one 16-bit channel value)
    static ref PROGRESS: Regex =
        Regex::new(r"^##: (.+)\s\[(.*)\]\s@\s(\d+)").expect("valid cd-paranoia progress regex");
    static ref SCSI_ERROR: Regex = Regex::new(r"^scsi_read error:").expect("valid scsi error regex");
}

/// Follows cd-paranoia's `--stderr-progress` output to work out how often
/// each frame had to be read.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    start: u32,
    stop: u32,
    /// Last frame read.
    read: u32,
    /// Last frame written.
    wrote: u32,
    errors: u32,
    /// Frames read in total, overreads past `stop` excluded.
    reads: u32,
}

impl ProgressParser {
    /// `stop` is inclusive.
    pub fn new(start: u32, stop: u32) -> Self {
        Self {
            start,
            stop,
            read: start,
            wrote: 0,
            errors: 0,
            reads: 0,
        }
    }

    pub fn parse(&mut self, line: &str) {
        if let Some(captures) = PROGRESS.captures(line)
            && let Ok(offset) = captures[3].parse::<u64>()
        {
            match &captures[2] {
                "read" => self.parse_read(offset),
                "wrote" => self.parse_wrote(offset),
                _ => {}
            }
        }

        if SCSI_ERROR.is_match(line) {
            self.errors += 1;
        }
    }

    fn parse_read(&mut self, word_offset: u64) {
        if word_offset % WORDS_PER_FRAME as u64 != 0 {
            debug!("Read offset {word_offset} is not a multiple of {WORDS_PER_FRAME}");
            return;
        }
        let frame = (word_offset / WORDS_PER_FRAME as u64) as u32;

        // going back to verify reads nothing new
        let (mark_start, mark_end) = if frame > self.read { (self.read, frame) } else { (frame, frame) };

        // reads past the track before going back to verify don't count
        let limit = self.stop + 1;
        self.reads += mark_end.min(limit) - mark_start.min(limit);
        self.read = frame;
    }

    fn parse_wrote(&mut self, word_offset: u64) {
        // most writes are reported one word short of a frame
        self.wrote = ((word_offset + 1) / WORDS_PER_FRAME as u64) as u32;
    }

    pub fn wrote(&self) -> u32 {
        self.wrote
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Every frame is read at least twice, any extra read lowers the
    /// quality below 1.
    pub fn track_quality(&self) -> f64 {
        let frames = (self.stop - self.start + 1) as f64;
        if self.reads == 0 {
            return 0.0;
        }
        (frames * 2.0 / self.reads as f64).min(1.0)
    }
}

/// How cd-paranoia reads from the drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read offset in samples.
    pub offset: i32,
    pub device: Option<String>,
    pub overread: bool,
}

/// An inclusive range of frames to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    pub start: u32,
    pub stop: u32,
}

impl FrameSpan {
    pub fn frames(&self) -> u32 {
        self.stop - self.start + 1
    }
}

/// cd-paranoia's `track[HH:MM:SS.FF]-track[HH:MM:SS.FF]` notation for a
/// frame span, relative to the tracks it starts and stops in.
pub fn paranoia_span(table: &Table, span: FrameSpan) -> TableResult<String> {
    let (mut start_track, mut start_offset) = (0u8, 0u32);
    let (mut stop_track, mut stop_offset) = (0u8, span.stop);

    for track in &table.tracks {
        let track_start = table.track_start(track.number)?;
        if track_start <= span.start {
            start_track = track.number;
            start_offset = span.start - track_start;
        }
        if table.track_end(track.number)? <= span.stop {
            stop_track = track.number;
            stop_offset = span.stop - track_start;
        }
    }

    debug!("Ripping from {} to {} (inclusive)", span.start, span.stop);
    debug!("Starting at track {start_track}, offset {start_offset}");
    debug!("Stopping at track {stop_track}, offset {stop_offset}");

    Ok(format!(
        "{start_track}[{}]-{stop_track}[{}]",
        frames_to_hmsf(start_offset),
        frames_to_hmsf(stop_offset)
    ))
}

/// cd-paranoia reading a span of frames into a WAV file.
#[derive(Debug)]
pub struct ReadTrack {
    path: PathBuf,
    span: FrameSpan,
    parser: ProgressParser,
    started: Option<Instant>,
    quality: Option<f64>,
    duration: Option<Duration>,
}

pub type ReadTrackTask = PopenTask<ReadTrack>;

impl ReadTrack {
    pub fn new(path: impl Into<PathBuf>, span: FrameSpan) -> Self {
        Self {
            path: path.into(),
            span,
            parser: ProgressParser::new(span.start, span.stop),
            started: None,
            quality: None,
            duration: None,
        }
    }

    /// `action` and `what` make up the description, e.g. "Verifying" and
    /// "track 3 of 12".
    pub fn task(
        table: &Table,
        path: &Path,
        span: FrameSpan,
        options: &ReadOptions,
        action: &str,
        what: &str,
    ) -> TableResult<ReadTrackTask> {
        let mut command: Vec<OsString> = vec![
            CD_PARANOIA.into(),
            "--stderr-progress".into(),
            format!("--sample-offset={}", options.offset).into(),
        ];
        if options.overread {
            command.push("--force-overread".into());
        }
        if let Some(device) = &options.device {
            command.push("--force-cdrom-device".into());
            command.push(device.into());
        }
        command.push(paranoia_span(table, span)?.into());
        command.push(path.into());

        Ok(PopenTask::new(format!("{action} {what}"), command, ReadTrack::new(path, span)))
    }

    pub fn quality(&self) -> Option<f64> {
        self.quality
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn finish(&mut self) {
        let duration = self.started.map(|started| started.elapsed()).unwrap_or_default();
        let quality = self.parser.track_quality();
        let seconds = self.span.frames() as f64 / FRAMES_PER_SECOND as f64;
        debug!(
            "Read {} frames in {:.1}s at {:.1}x, quality {:.2}%",
            self.span.frames(),
            duration.as_secs_f64(),
            seconds / duration.as_secs_f64().max(f64::EPSILON),
            quality * 100.0
        );
        self.quality = Some(quality);
        self.duration = Some(duration);
    }

    fn check_size(&self) -> TaskResult<()> {
        let actual = std::fs::metadata(&self.path)?.len();
        let expected = self.span.frames() as u64 * BYTES_PER_FRAME as u64 + WAV_HEADER_LENGTH;
        if actual == expected {
            return Ok(());
        }

        warn!("File size {actual} did not match expected size {expected}");
        let difference = actual as i64 - expected as i64;
        if difference % BYTES_PER_FRAME as i64 == 0 {
            warn!("{} frames difference", difference / BYTES_PER_FRAME as i64);
        } else {
            warn!("Non-integral amount of frames difference");
        }

        Err(TaskError::FileSize {
            path: self.path.display().to_string(),
            expected,
            actual,
        })
    }
}

impl ProcessHandler for ReadTrack {
    fn spawned(&mut self) {
        self.started = Some(Instant::now());
    }

    fn line(
        &mut self,
        stream: Stream,
        line: &str,
        core: &mut TaskCore,
        listener: &mut dyn TaskListener,
    ) -> ControlFlow<()> {
        if stream != Stream::Stderr {
            return ControlFlow::Continue(());
        }

        self.parser.parse(line);
        if self.parser.errors() > MAX_ERRORS {
            debug!("{} errors, terminating", self.parser.errors());
            return ControlFlow::Break(());
        }

        let written = self.parser.wrote() as f64 - self.span.start as f64 + 1.0;
        let progress = written / self.span.frames() as f64;
        if progress < 1.0 {
            core.set_progress(progress, listener);
        }
        ControlFlow::Continue(())
    }

    fn done(&mut self) -> TaskResult<()> {
        self.finish();
        self.check_size()
    }

    fn failed(&mut self, program: &str, exit: Exit) -> TaskResult<()> {
        self.finish();
        if exit.terminated {
            warn!("Gave up reading after {} SCSI errors", self.parser.errors());
        }
        Err(TaskError::ReturnCode {
            program: program.to_string(),
            code: exit.code,
            stderr: exit.stderr,
        })
    }
}

/// What a successful [`ReadVerifyTrackTask`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RippedTrack {
    /// Final location of the FLAC file, shortened if the file system refused
    /// the requested name.
    pub path: PathBuf,
    /// CRC32 of the audio, identical for both reads and the encoded file.
    pub checksum: u32,
    /// 0 to 1.
    pub peak: f64,
    /// The worse of both reads.
    pub quality: f64,
    pub test_duration: Duration,
    pub copy_duration: Duration,
}

/// Reads a span twice, compares both reads, encodes to FLAC, checks the
/// encoding, measures the peak level and tags the result.
///
/// The FLAC file is written next to its final path with a `.part` suffix
/// and only renamed into place when every check passed.
pub struct ReadVerifyTrackTask {
    steps: MultiSeparateTask<TrackSteps>,
    path: PathBuf,
    part_path: PathBuf,
    wav_path: Option<TempPath>,
    ripped: Option<RippedTrack>,
}

struct TrackSteps {
    read_test: ReadTrackTask,
    test_crc: Crc32Task,
    read_copy: ReadTrackTask,
    copy_crc: Crc32Task,
    encode: FlacEncodeTask,
    encoded_crc: Crc32Task,
    peak: PeakLevelTask,
    tagging: TaggingTask,
    picture: Option<EmbedPictureTask>,
}

impl TaskList for TrackSteps {
    fn tasks_mut(&mut self) -> Vec<&mut dyn Task> {
        let mut tasks: Vec<&mut dyn Task> = Vec::with_capacity(9);
        tasks.push(&mut self.read_test);
        tasks.push(&mut self.test_crc);
        tasks.push(&mut self.read_copy);
        tasks.push(&mut self.copy_crc);
        tasks.push(&mut self.encode);
        tasks.push(&mut self.encoded_crc);
        tasks.push(&mut self.peak);
        tasks.push(&mut self.tagging);
        if let Some(picture) = &mut self.picture {
            tasks.push(picture);
        }
        tasks
    }
}

/// Track tags and optional cover art written to a ripped file.
#[derive(Debug, Clone, Default)]
pub struct TrackTags {
    pub tags: BTreeMap<String, String>,
    pub cover_art: Option<PathBuf>,
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

fn create_part(path: &Path) -> std::io::Result<PathBuf> {
    let part = part_path(path);
    std::fs::File::create(&part)?;
    Ok(part)
}

impl ReadVerifyTrackTask {
    pub fn new(
        table: &Table,
        path: &Path,
        span: FrameSpan,
        options: &ReadOptions,
        tags: &TrackTags,
        what: &str,
    ) -> TaskResult<Self> {
        debug!("Creating read and verify task on {}", path.display());

        let (path, part_path) = match create_part(path) {
            Ok(part) => (path.to_path_buf(), part),
            Err(e) if e.raw_os_error() == Some(libc::ENAMETOOLONG) => {
                let path = shrink_path(path);
                debug!("Name too long, shortened to {}", path.display());
                let part = create_part(&path)?;
                (path, part)
            }
            Err(e) => return Err(e.into()),
        };

        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let wav_path = tempfile::Builder::new()
            .prefix(".cdrip-")
            .suffix(".wav")
            .tempfile_in(dir)?
            .into_temp_path();

        let read_test = ReadTrack::task(table, &wav_path, span, options, "Reading", what)?;
        let read_copy = ReadTrack::task(table, &wav_path, span, options, "Verifying", what)?;
        let picture = tags
            .cover_art
            .as_deref()
            .and_then(|cover_art| EmbedPicture::task(&part_path, cover_art));

        let steps = TrackSteps {
            test_crc: Crc32Task::with_format(&*wav_path, AudioFormat::Wav),
            copy_crc: Crc32Task::with_format(&*wav_path, AudioFormat::Wav),
            encode: FlacEncode::task(&wav_path, &part_path, what),
            encoded_crc: Crc32Task::with_format(&part_path, AudioFormat::Flac),
            peak: PeakLevel::task(&wav_path),
            tagging: Tagging::task(&part_path, &tags.tags),
            picture,
            read_test,
            read_copy,
        };

        Ok(Self {
            steps: MultiSeparateTask::new(format!("Ripping {what}"), steps),
            path,
            part_path,
            wav_path: Some(wav_path),
            ripped: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ripped(&self) -> Option<&RippedTrack> {
        self.ripped.as_ref()
    }

    /// Read checksums of the last run, also set when they did not match.
    pub fn checksums(&self) -> (Option<u32>, Option<u32>) {
        let steps = self.steps.tasks();
        (steps.test_crc.checksum(), steps.copy_crc.checksum())
    }

    async fn finish(&mut self) -> TaskResult<RippedTrack> {
        let (Some(test_crc), Some(copy_crc)) = self.checksums() else {
            return Err(TaskError::Checksum("reads were not checksummed".to_string()));
        };
        if test_crc != copy_crc {
            info!("Checksums do not match, {test_crc:08x} {copy_crc:08x}");
            return Err(TaskError::Checksum(format!(
                "read and verify failed: test {test_crc:08x}, copy {copy_crc:08x}"
            )));
        }
        info!("Checksums match, {test_crc:08x}");

        let encoded_crc = self.steps.tasks().encoded_crc.checksum();
        if encoded_crc != Some(test_crc) {
            return Err(TaskError::Checksum(format!(
                "encoding failed, decoded checksum {} does not match {test_crc:08x}",
                encoded_crc.map_or_else(|| "None".to_string(), |crc| format!("{crc:08x}"))
            )));
        }

        if let Some(wav_path) = self.wav_path.take()
            && let Err(e) = wav_path.close()
        {
            warn!("Could not remove temporary WAV file: {e}");
        }

        debug!("Moving to final path {}", self.path.display());
        tokio::fs::rename(&self.part_path, &self.path).await?;

        let steps = self.steps.tasks();
        let test = steps.read_test.handler();
        let copy = steps.read_copy.handler();
        Ok(RippedTrack {
            path: self.path.clone(),
            checksum: test_crc,
            peak: steps.peak.handler().peak().unwrap_or_default(),
            quality: test.quality().unwrap_or_default().min(copy.quality().unwrap_or_default()),
            test_duration: test.duration().unwrap_or_default(),
            copy_duration: copy.duration().unwrap_or_default(),
        })
    }
}

impl Task for ReadVerifyTrackTask {
    fn core(&self) -> &TaskCore {
        self.steps.core()
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        self.steps.core_mut()
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        async move {
            let outcome = match self.steps.run(listener).await {
                Ok(()) => self.finish().await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(ripped) => {
                    self.ripped = Some(ripped);
                    Ok(())
                }
                Err(e) => {
                    if let Err(remove) = tokio::fs::remove_file(&self.part_path).await {
                        debug!("Could not remove {}: {remove}", self.part_path.display());
                    }
                    Err(e)
                }
            }
        }
        .boxed_local()
    }

    fn abort(&mut self) {
        self.steps.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::table::Index;
    use crate::image::table::tests::ladyhawke;
    use crate::task::{NoListener, drive};

    /// Progress line as cd-paranoia prints it for `frame`.
    fn at(function: &str, frame: u32) -> String {
        format!("##: 0 [{function}] @ {}", frame * WORDS_PER_FRAME)
    }

    #[test]
    fn two_clean_passes_are_full_quality() {
        let mut parser = ProgressParser::new(0, 9);
        for line in [at("read", 0), at("read", 10), at("read", 0), at("read", 10)] {
            parser.parse(&line);
        }
        assert_eq!(parser.track_quality(), 1.0);

        parser.parse(&at("read", 0));
        parser.parse(&at("read", 10));
        assert!((parser.track_quality() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn overreads_past_stop_are_not_counted() {
        let mut parser = ProgressParser::new(0, 9);
        parser.parse(&at("read", 25));
        parser.parse(&at("read", 0));
        parser.parse(&at("read", 30));
        assert_eq!(parser.track_quality(), 1.0);
    }

    #[test]
    fn unaligned_reads_are_ignored() {
        let mut parser = ProgressParser::new(0, 9);
        parser.parse("##: 0 [read] @ 100");
        parser.parse("garbage");
        assert_eq!(parser.track_quality(), 0.0);
    }

    #[test]
    fn writes_and_scsi_errors() {
        let mut parser = ProgressParser::new(100, 199);
        parser.parse(&format!("##: -2 [wrote] @ {}", 150 * WORDS_PER_FRAME - 1));
        parser.parse("scsi_read error: sector=12 length=1 retry=0");
        parser.parse("scsi_read error: sector=12 length=1 retry=1");
        assert_eq!(parser.wrote(), 150);
        assert_eq!(parser.errors(), 2);
    }

    #[test]
    fn span_within_one_track() {
        let table = ladyhawke();
        let span = FrameSpan {
            start: table.track_start(3).unwrap(),
            stop: table.track_end(3).unwrap(),
        };
        assert_eq!(paranoia_span(&table, span).unwrap(), "3[00:00:00.00]-3[00:04:15.49]");
    }

    #[test]
    fn span_of_hidden_track_one_audio() {
        let mut table = ladyhawke();
        let track = table.track_mut(1).unwrap();
        track.index_mut(1).unwrap().absolute = Some(100);
        track.set_index(Index::new(0, Some(0), None, None, None));

        let span = FrameSpan { start: 0, stop: 99 };
        assert_eq!(paranoia_span(&table, span).unwrap(), "0[00:00:00.00]-0[00:00:01.24]");
    }

    #[test]
    fn read_arguments() {
        let table = ladyhawke();
        let span = FrameSpan {
            start: 0,
            stop: table.track_end(1).unwrap(),
        };
        let options = ReadOptions {
            offset: 6,
            device: Some("/dev/sr0".to_string()),
            overread: true,
        };
        let task = ReadTrack::task(&table, Path::new("t.wav"), span, &options, "Reading", "track 1 of 12")
            .unwrap();

        let args: Vec<_> = task.command().iter().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "cd-paranoia",
                "--stderr-progress",
                "--sample-offset=6",
                "--force-overread",
                "--force-cdrom-device",
                "/dev/sr0",
                "1[00:00:00.00]-1[00:03:27.11]",
                "t.wav",
            ]
        );
        assert_eq!(task.core().description(), "Reading track 1 of 12");
    }

    fn fake_read(path: &Path, span: FrameSpan, bytes: u64) -> ReadTrackTask {
        let script = format!(
            "printf '{}\\n{}\\n{}\\n{}\\n' >&2; head -c {bytes} /dev/zero > '{}'",
            at("read", span.start),
            at("read", span.stop + 1),
            at("read", span.start),
            at("read", span.stop + 1),
            path.display()
        );
        PopenTask::new("Reading track", ["sh".to_string(), "-c".to_string(), script], ReadTrack::new(path, span))
    }

    #[tokio::test]
    async fn read_checks_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        let span = FrameSpan { start: 10, stop: 19 };

        let mut task = fake_read(&path, span, 10 * 2352 + 44);
        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.handler().quality(), Some(1.0));
        assert!(task.handler().duration().is_some());

        let mut task = fake_read(&path, span, 9 * 2352 + 44);
        assert!(matches!(
            drive(&mut task, &mut NoListener).await,
            Err(TaskError::FileSize { expected: 23564, actual: 21212, .. })
        ));
    }

    #[test]
    fn too_long_names_are_shortened() {
        let dir = tempfile::tempdir().unwrap();
        let name = format!("{}.flac", vec!["Interminable"; 30].join(" "));
        let path = dir.path().join(name);
        let table = ladyhawke();
        let span = FrameSpan { start: 0, stop: 99 };

        let task = ReadVerifyTrackTask::new(&table, &path, span, &ReadOptions::default(), &TrackTags::default(), "track 1 of 12")
            .unwrap();
        assert_ne!(task.path(), path.as_path());
        assert!(task.path().file_name().unwrap().len() < 255);
        assert!(part_path(task.path()).exists());
    }

    #[tokio::test]
    async fn failed_rip_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track01.flac");
        let table = ladyhawke();
        let options = ReadOptions {
            device: Some("/nonexistent/cdrom".to_string()),
            ..Default::default()
        };
        let span = FrameSpan { start: 0, stop: 99 };

        let mut task = ReadVerifyTrackTask::new(&table, &path, span, &options, &TrackTags::default(), "track 1 of 12")
            .unwrap();
        assert!(part_path(&path).exists());

        assert!(drive(&mut task, &mut NoListener).await.is_err());
        assert!(!part_path(&path).exists());
        assert!(task.ripped().is_none());
    }
}

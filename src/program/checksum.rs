use crate::accurip::checksum::TrackChecksums;
use crate::accurip::{checksum_span, checksum_track};
use crate::program::{AudioFormat, read_pcm_as};
use crate::task::error::TaskResult;
use crate::task::{Task, TaskCore, TaskListener};
use crc::{CRC_32_ISO_HDLC, Crc};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::debug;
use std::path::{Path, PathBuf};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of the PCM data of a WAV file, or of the decoded samples of a FLAC
/// file, so both compare equal for the same audio.
pub fn pcm_crc32(format: AudioFormat, path: &Path) -> TaskResult<u32> {
    let digest = read_pcm_as(format, path, |_| CRC32.digest(), |digest, data| digest.update(data))?;
    Ok(digest.finalize())
}

pub struct Crc32Task {
    core: TaskCore,
    path: PathBuf,
    format: AudioFormat,
    checksum: Option<u32>,
}

impl Crc32Task {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = AudioFormat::of(&path);
        Self::with_format(path, format)
    }

    pub fn with_format(path: impl Into<PathBuf>, format: AudioFormat) -> Self {
        Self {
            core: TaskCore::new("Calculating checksum"),
            path: path.into(),
            format,
            checksum: None,
        }
    }

    pub fn checksum(&self) -> Option<u32> {
        self.checksum
    }
}

impl Task for Crc32Task {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        async move {
            let (path, format) = (self.path.clone(), self.format);
            let checksum = tokio::task::spawn_blocking(move || pcm_crc32(format, &path)).await??;
            debug!("CRC32 of {} is {checksum:08x}", self.path.display());

            self.checksum = Some(checksum);
            self.core.set_progress(1.0, listener);
            Ok(())
        }
        .boxed_local()
    }
}

/// AccurateRip v1 and v2 checksums of one track of a disc.
pub struct AccurateRipChecksumTask {
    core: TaskCore,
    path: PathBuf,
    /// `(start, length)` in samples when the track shares its file.
    span: Option<(u64, u64)>,
    track_number: usize,
    track_count: usize,
    checksums: Option<TrackChecksums>,
}

impl AccurateRipChecksumTask {
    pub fn new(path: impl Into<PathBuf>, track_number: usize, track_count: usize) -> Self {
        Self {
            core: TaskCore::new(format!("Calculating AccurateRip checksums of track {track_number}")),
            path: path.into(),
            span: None,
            track_number,
            track_count,
            checksums: None,
        }
    }

    pub fn with_span(mut self, start: u64, length: u64) -> Self {
        self.span = Some((start, length));
        self
    }

    pub fn checksums(&self) -> Option<TrackChecksums> {
        self.checksums
    }
}

impl Task for AccurateRipChecksumTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        async move {
            let (path, span) = (self.path.clone(), self.span);
            let (track_number, track_count) = (self.track_number, self.track_count);
            let checksums = tokio::task::spawn_blocking(move || match span {
                Some((start, length)) => checksum_span(&path, start, length, track_number, track_count),
                None => checksum_track(&path, track_number, track_count),
            })
            .await??;
            debug!(
                "AccurateRip checksums of track {track_number}: v1 {}, v2 {}",
                checksums.v1_hex(),
                checksums.v2_hex()
            );

            self.checksums = Some(checksums);
            self.core.set_progress(1.0, listener);
            Ok(())
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accurip::checksum::accuraterip_checksum;
    use crate::accurip::checksum::tests::noise;
    use crate::program::flac::tests::flac_bytes;
    use crate::program::wav::tests::cd_wav;
    use crate::task::error::TaskError;
    use crate::task::{NoListener, drive};

    #[tokio::test]
    async fn crc32_of_wav_data_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        std::fs::write(&path, cd_wav(&noise())).unwrap();

        let mut task = Crc32Task::new(&path);
        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.checksum(), Some(0xc7c1034f));
    }

    #[tokio::test]
    async fn flac_and_wav_of_same_audio_match() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("track.wav");
        let flac = dir.path().join("track.flac");
        std::fs::write(&wav, cd_wav(&noise())).unwrap();
        std::fs::write(&flac, flac_bytes(&noise(), 2)).unwrap();

        assert_eq!(
            pcm_crc32(AudioFormat::Wav, &wav).unwrap(),
            pcm_crc32(AudioFormat::Flac, &flac).unwrap()
        );
    }

    #[tokio::test]
    async fn partial_flac_needs_explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("01.flac.part");
        std::fs::write(&path, flac_bytes(&noise(), 2)).unwrap();

        let mut task = Crc32Task::with_format(&path, AudioFormat::Flac);
        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.checksum(), Some(0xc7c1034f));
    }

    #[tokio::test]
    async fn unreadable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        std::fs::write(&path, b"not audio").unwrap();

        let mut task = Crc32Task::new(&path);
        assert!(matches!(
            drive(&mut task, &mut NoListener).await,
            Err(TaskError::Audio(_))
        ));
        assert_eq!(task.checksum(), None);
    }

    #[tokio::test]
    async fn accuraterip_checksums_of_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        std::fs::write(&path, cd_wav(&noise())).unwrap();

        let mut task = AccurateRipChecksumTask::new(&path, 2, 3);
        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.checksums(), Some(accuraterip_checksum(&noise(), 2, 3)));
    }

    #[tokio::test]
    async fn accuraterip_checksums_of_span() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.wav");
        let data = noise();
        std::fs::write(&path, cd_wav(&data)).unwrap();

        let mut task = AccurateRipChecksumTask::new(&path, 3, 3).with_span(588 * 2, 588 * 10);
        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(
            task.checksums(),
            Some(accuraterip_checksum(&data[588 * 2 * 4..], 3, 3))
        );
    }
}

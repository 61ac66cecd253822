use crate::program::error::AudioResult;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub mod cdparanoia;
pub mod cdrdao;
pub mod checksum;
pub mod error;
pub mod flac;
pub mod rip;
pub mod sox;
pub mod wav;

pub const READ_CHUNK: usize = 64 * 1024;

lazy_static! {
    static ref PARANOIA_VERSION: Regex =
        Regex::new(r"^cdparanoia (.+) release (.+)").expect("valid cd-paranoia version regex");
    static ref CDRDAO_VERSION: Regex =
        Regex::new(r"^Cdrdao version (.*) - \(C\)").expect("valid cdrdao version regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
}

impl AudioFormat {
    /// FLAC for a `.flac` extension, WAV otherwise.
    pub fn of(path: &Path) -> Self {
        let is_flac = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("flac"));
        if is_flac { AudioFormat::Flac } else { AudioFormat::Wav }
    }
}

/// Streams the PCM samples of a WAV or FLAC file, picked by extension.
pub fn read_pcm<T>(
    path: &Path,
    start: impl FnOnce(u64) -> T,
    update: impl FnMut(&mut T, &[u8]),
) -> AudioResult<T> {
    read_pcm_as(AudioFormat::of(path), path, start, update)
}

pub fn read_pcm_as<T>(
    format: AudioFormat,
    path: &Path,
    start: impl FnOnce(u64) -> T,
    update: impl FnMut(&mut T, &[u8]),
) -> AudioResult<T> {
    match format {
        AudioFormat::Flac => flac::read_pcm(path, start, update),
        AudioFormat::Wav => wav::read_pcm(path, start, update),
    }
}

/// Length of a WAV or FLAC file in stereo samples.
pub fn sample_count(path: &Path) -> AudioResult<u64> {
    match AudioFormat::of(path) {
        AudioFormat::Flac => flac::sample_count(path),
        AudioFormat::Wav => wav::sample_count(path),
    }
}

async fn program_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| debug!("Could not run {program}: {e}"))
        .ok()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Some(text)
}

fn match_version(output: &str, regex: &Regex) -> Option<String> {
    output.lines().find_map(|line| {
        let captures = regex.captures(line)?;
        let version = captures
            .iter()
            .skip(1)
            .flatten()
            .map(|group| group.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Some(version)
    })
}

/// Version of the installed cd-paranoia, e.g. `10.2 libcdio 2.0.0`.
pub async fn cdparanoia_version() -> Option<String> {
    let output = program_output(cdparanoia::CD_PARANOIA, &["-V"]).await?;
    match_version(&output, &PARANOIA_VERSION)
}

/// Version of the installed cdrdao. It prints its banner to stderr and exits
/// with 1 when run without a command.
pub async fn cdrdao_version() -> Option<String> {
    let output = program_output(cdrdao::CDRDAO, &[]).await?;
    match_version(&output, &CDRDAO_VERSION)
}

use crate::program::rip::{MAX_TRIES, RipOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_DEVICE: &str = "/dev/cdrom";

/// Commands reading from a CD drive
#[derive(Subcommand, Debug)]
pub enum CdCommands {
    Info(InfoCommand),
    Rip(RipCommand),
}

/// Reads the disc's table of contents and prints its identifiers.
#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// CD drive to read from
    #[arg(value_name = "DEVICE", long, short = 'd', default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Skip scanning for pregaps and index marks
    #[arg(long, default_value_t = false)]
    pub fast_toc: bool,
}

/// Rips every audio track to FLAC, writes a cue sheet and verifies the rip
/// against AccurateRip.
#[derive(Parser, Debug, Clone)]
pub struct RipCommand {
    /// CD drive to read from
    #[arg(value_name = "DEVICE", long, short = 'd', default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Read offset of the drive in samples
    #[arg(value_name = "OFFSET", long, short = 'o', default_value_t = 0, allow_hyphen_values = true)]
    pub offset: i32,

    /// Read into the lead-out when the offset requires it
    #[arg(long, default_value_t = false)]
    pub overread: bool,

    /// Tries per track before giving up
    #[arg(value_name = "MAX_RETRIES", long, short = 'r', default_value_t = MAX_TRIES)]
    pub max_retries: u32,

    /// Directory the tracks and cue sheet are written to
    #[arg(value_name = "OUTPUT_DIR", long, short = 'O', default_value = ".")]
    pub output_dir: PathBuf,

    /// JPEG or PNG image embedded into every track
    #[arg(value_name = "COVER_ART", long)]
    pub cover_art: Option<PathBuf>,

    /// Keep a copy of the disc's TOC next to the rip
    #[arg(long, default_value_t = false)]
    pub keep_toc: bool,
}

impl From<&RipCommand> for RipOptions {
    fn from(cmd: &RipCommand) -> Self {
        RipOptions {
            device: Some(cmd.device.clone()),
            offset: cmd.offset,
            overread: cmd.overread,
            max_retries: cmd.max_retries,
            output_dir: cmd.output_dir.clone(),
            cover_art: cmd.cover_art.clone(),
        }
    }
}

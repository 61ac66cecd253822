use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Commands working on .toc files and ripped cue images
#[derive(Subcommand, Debug)]
pub enum ImageCommands {
    Ids(IdsCommand),
    Verify(VerifyCommand),
}

/// Prints the disc identifiers of a .toc or .cue file.
#[derive(Parser, Debug, Clone)]
pub struct IdsCommand {
    /// .toc or .cue file, followed by one .toc file per later session
    #[arg(value_name = "INPUT", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
}

/// Verifies the tracks of a cue image against AccurateRip.
#[derive(Parser, Debug, Clone)]
pub struct VerifyCommand {
    /// .cue file of the image
    #[arg(value_name = "INPUT_CUE")]
    pub input_cue: PathBuf,
}

use crate::commands::accurip::AccurateRipCommands;
use crate::commands::cd::CdCommands;
use crate::commands::image::ImageCommands;
use clap::{Parser, Subcommand};

pub mod accurip;
pub mod cd;
pub mod image;

/// CLI for ripping audio CDs and verifying rips against AccurateRip.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(subcommand)]
    Cd(CdCommands),
    #[command(subcommand)]
    Accurip(AccurateRipCommands),
    #[command(subcommand)]
    Image(ImageCommands),
}

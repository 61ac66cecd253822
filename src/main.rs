use crate::accurip::show_entry;
use crate::cd::info::disc_info;
use crate::cd::rip::rip_disc;
use crate::commands::accurip::AccurateRipCommands;
use crate::commands::cd::CdCommands;
use crate::commands::image::ImageCommands;
use crate::commands::{Cli, Commands};
use crate::image::{print_image_ids, verify_image};
use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

mod accurip;
mod cd;
mod commands;
mod image;
mod program;
mod result;
mod task;
mod util;

pub mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let logger = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .build();

    let level = logger.filter();
    let pb = MultiProgress::new();

    LogWrapper::new(pb.clone(), logger).try_init()?;
    log::set_max_level(level);

    let cli = Cli::parse();

    match cli.command {
        Commands::Cd(inner) => match inner {
            CdCommands::Info(cmd) => disc_info(pb.clone(), &cmd.device, cmd.fast_toc).await?,
            CdCommands::Rip(cmd) => {
                rip_disc(pb.clone(), (&cmd).into(), cmd.keep_toc).await?;
            }
        },
        Commands::Accurip(inner) => match inner {
            AccurateRipCommands::Show(cmd) => show_entry(&cmd.path).await?,
        },
        Commands::Image(inner) => match inner {
            ImageCommands::Ids(cmd) => print_image_ids(&cmd.inputs).await?,
            ImageCommands::Verify(cmd) => {
                if !verify_image(pb.clone(), &cmd.input_cue).await? {
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}

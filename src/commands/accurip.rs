use clap::{Parser, Subcommand};

/// Commands querying the AccurateRip database
#[derive(Subcommand, Debug)]
pub enum AccurateRipCommands {
    Show(ShowCommand),
}

/// Fetches a database entry and prints every pressing in it.
#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// Entry path, e.g. a/5/d/dBAR-012-0013bd5a-00b8d489-c60af50d.bin
    #[arg(value_name = "PATH")]
    pub path: String,
}

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::{
    backends,
    config::{ServeArgs, ServerConfig},
    coordinator,
};

#[derive(Debug, Parser)]
#[command(name = "pantilt", version, about = "Detection-tracking fusion server for a pan/tilt servo pair")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the WebSocket server.
    Serve(ServeArgs),
    /// Report which tracker backends this build can construct.
    Trackers,
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::try_from(args)?;
            coordinator::run(config)
        }
        Command::Trackers => {
            backends::print_tracker_report();
            Ok(())
        }
    }
}

mod bootstrap_helpers;
mod cli_args;
mod replay_collaborators;
mod replay_runtime;

use anyhow::{Context, Result};
use clap::Parser;
use playport_session::load_frame_session_config;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, HostCommand};
use crate::replay_runtime::execute_replay_command;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        HostCommand::Replay(args) => execute_replay_command(&args).await,
        HostCommand::CheckConfig(args) => {
            let config = load_frame_session_config(&args.config)?;
            let rendered = serde_json::to_string_pretty(&config)
                .context("failed to render session config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

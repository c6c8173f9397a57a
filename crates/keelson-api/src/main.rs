//! keelson CLI entry point.
//!
//! Binary name: `keelson`
//!
//! Parses CLI arguments, sets up tracing, starts the workflow manager on the
//! SQLite checkpoint store and dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::workflow::OutputMode;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    keelson_observe::tracing_setup::init_tracing(cli.log_directive(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "keelson", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "keelson ready");

    let mode = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
    };
    let result = cli::workflow::handle_command(cli.command, &state, mode).await;

    // Runs still active here (Ctrl-C during run/resume) are left RESUMABLE.
    let shutdown = state.shutdown().await;
    keelson_observe::tracing_setup::shutdown_tracing();

    result.and(shutdown)
}

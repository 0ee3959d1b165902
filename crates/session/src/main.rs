// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use stockroom_session::config::SessionConfig;
use stockroom_session::{Command, Login};

#[derive(Parser)]
#[command(name = "stockroom-session", version, about = "Stockroom session and notification client")]
struct Cli {
    #[command(flatten)]
    config: SessionConfig,

    /// Sign-in identifier.
    #[arg(long, env = "STOCKROOM_IDENTIFIER")]
    identifier: String,

    /// Sign-in secret.
    #[arg(long, env = "STOCKROOM_SECRET", hide_env_values = true)]
    secret: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let login = Login { identifier: cli.identifier, secret: cli.secret };
    if let Err(e) = stockroom_session::run(cli.config, login, cli.command).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

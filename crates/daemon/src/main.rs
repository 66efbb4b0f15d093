// shelfd: standalone mode entry point.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shelf_daemon::runtime::{DaemonOptions, LoginOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "shelfd", about = "Offline queue and sync daemon for a read-it-later library")]
struct Cli {
    /// Config file (defaults to ~/.shelf/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides `[storage] db_path`).
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Sync the offline queue once at startup.
    #[arg(long)]
    sync_now: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Store the server access token in the OS keychain.
    Login {
        /// Also save this server url to the config file.
        #[arg(long, value_name = "URL")]
        url: Option<String>,
        /// Token value; read from stdin when omitted.
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Remove the stored access token.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Login { url, token }) => {
            let token = match token {
                Some(token) => token,
                None => read_token_from_stdin()?,
            };
            shelf_daemon::runtime::login(LoginOptions {
                config_path: cli.config,
                server_url: url,
                token,
            })
        }
        Some(Command::Logout) => shelf_daemon::runtime::logout(),
        None => {
            info!("starting shelf daemon");
            shelf_daemon::runtime::run_standalone(DaemonOptions {
                config_path: cli.config,
                db_path: cli.db,
                sync_now: cli.sync_now,
            })
            .await
            .context("shelf daemon terminated unexpectedly")
        }
    }
}

fn read_token_from_stdin() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("failed to read token from stdin")?;
    let token = line.trim();
    if token.is_empty() {
        bail!("no token given; pass --token or pipe it on stdin");
    }
    Ok(token.to_string())
}

//! apkrelay entry point.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Moves Android packages past per-message size limits.
#[derive(Debug, Parser)]
#[command(name = "apkrelay", version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config path).
    #[arg(long, global = true, env = "APKRELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the staging relay server.
    Serve {
        /// Address to bind, overriding `relay.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Transfer a local file or an http(s) URL to the output directory.
    Send {
        /// Path or URL of the payload.
        source: String,
        /// Name to deliver under (defaults to the file or URL name).
        #[arg(long)]
        name: Option<String>,
        /// Print the full transfer report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Download a staged payload from the relay.
    Fetch {
        /// Full download URL, or a staged name on `relay.url`.
        target: String,
        out: PathBuf,
    },
    /// Rebuild a payload from its numbered parts.
    Reassemble {
        /// Directory holding `<name>.part<i>` files.
        dir: PathBuf,
        /// Original payload name.
        name: String,
        /// Output file (defaults to `<dir>/<name>`).
        out: Option<PathBuf>,
        /// Expected number of parts; extra or missing parts are an error.
        #[arg(long)]
        parts: Option<u32>,
        /// Expected SHA-256 of the rebuilt payload.
        #[arg(long)]
        sha256: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        policy = ?config.transfer.oversize_policy,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Serve { bind } => commands::serve(&config, bind).await,
            Command::Send { source, name, json } => {
                commands::send(&config, &source, name, json).await
            }
            Command::Fetch { target, out } => commands::fetch(&config, &target, &out).await,
            Command::Reassemble {
                dir,
                name,
                out,
                parts,
                sha256,
            } => commands::reassemble(&dir, &name, out, parts, sha256.as_deref()).await,
        }
    })
}

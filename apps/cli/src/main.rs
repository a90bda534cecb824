mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "codedrop")]
#[command(about = "Peer-to-peer file transfer with a six-digit code")]
struct Cli {
    /// Override the signaling relay URL.
    #[arg(long, global = true, value_name = "URL")]
    signaling_url: Option<String>,

    /// Abandon the session after this many idle seconds.
    #[arg(long, global = true, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Use this configuration file instead of the default one.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a file; prints the code the receiver must enter.
    Send {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Use this code instead of generating one.
        #[arg(long, value_name = "CODE")]
        code: Option<String>,
    },
    /// Receive a file sent under CODE.
    Receive {
        #[arg(value_name = "CODE")]
        code: String,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load configuration, using defaults");
            Config::default()
        }),
    };
    if let Some(url) = cli.signaling_url {
        cfg.signaling_url = url;
    }
    if let Some(secs) = cli.timeout_secs {
        cfg.session_timeout_secs = secs;
    }

    match cli.command {
        Command::Send { file, code } => app::run_send(&cfg, &file, code.as_deref()).await,
        Command::Receive { code, output_dir } => {
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            app::run_receive(&cfg, &code).await
        }
    }
}

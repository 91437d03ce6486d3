//! notedrop command-line entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notedrop")]
#[command(version)]
#[command(about = "Resumable, integrity-checked uploads of study material")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the configuration file)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Log filter, e.g. `debug` or `notedrop_uploader=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Name to store the file under (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,

        /// MIME type (guessed from the extension by default)
        #[arg(long)]
        content_type: Option<String>,

        /// Metadata entry passed to the backend, repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,

        /// Opaque destination handle forwarded on completion
        #[arg(long)]
        destination_token: Option<String>,
    },

    /// Continue an interrupted upload
    Resume {
        /// Session id printed when the upload was interrupted
        session_id: String,

        /// The same file, possibly at a new path
        file: PathBuf,
    },

    /// Cancel an upload and release its server-side state
    Cancel {
        session_id: String,
    },

    /// Show whether an upload can be resumed
    Status {
        session_id: String,
    },

    /// List uploads that can be resumed
    Pending,
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    // Logs go to stderr; stdout carries command results.
    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_url,
        "starting notedrop"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli.command, config))
}

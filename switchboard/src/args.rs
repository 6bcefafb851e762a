use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// The OpenAI-compatible orchestration gateway.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Socket address to listen on. Overrides the configuration file.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,responses=debug".
    #[arg(long, default_value = "info")]
    pub log: String,
}

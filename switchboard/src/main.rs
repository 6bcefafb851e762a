use std::net::SocketAddr;

use args::Args;
use clap::Parser;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8084";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::from_env()?,
    };

    let listen_address = args
        .listen
        .or(config.server.listen_address)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse().expect("default listen address is valid"));

    let shutdown_signal = CancellationToken::new();

    let ctrl_c_signal = shutdown_signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_signal.cancel();
        }
    });

    serve_with(listen_address, config, shutdown_signal, args.log).await
}

async fn serve_with(
    listen_address: SocketAddr,
    config: config::Config,
    shutdown_signal: CancellationToken,
    log_filter: String,
) -> anyhow::Result<()> {
    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}

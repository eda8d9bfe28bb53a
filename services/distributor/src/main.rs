//! Release distribution server.
//!
//! ```text
//! distributor-server --config distributor.toml --listen 0.0.0.0:8080
//! ```
//!
//! Log output is filtered with `RUST_LOG`, defaulting to `info`.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use distributor::DistributorConfig;

/// Serve releases to subscribers over HTTP.
#[derive(Debug, Parser)]
#[command(name = "distributor-server", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "DISTRIBUTOR_CONFIG", default_value = "distributor.toml")]
    config: Utf8PathBuf,

    /// Address to listen on.
    #[arg(long, short, env = "DISTRIBUTOR_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    configure_logging();
    let args = Args::parse();

    let config = DistributorConfig::load(&args.config)?;
    tracing::info!(config = %args.config, storage = ?config.storage, "Loaded configuration");

    let distributor = config.into_builder()?.build()?;

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!("Distributor listening on http://{}", listener.local_addr()?);

    axum::serve(listener, distributor.router()).await?;
    Ok(())
}

//! C8 Configuration & Bootstrap: CLI/env/file config, tracing subscriber,
//! wiring C1-C7 via `Engine`, and the accept loop. Grounded on
//! `valence_network`'s `ServerPlugin`/`SharedServer` construction, flattened
//! from a Bevy plugin into a plain `tokio::main`.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use worldsync::{Config, Engine};

#[derive(Parser, Debug)]
#[command(name = "worldsyncd", about = "Real-time multi-client 3D scene coordination server")]
struct Args {
    /// Path to a TOML config file. Fields not present fall back to defaults,
    /// then `WORLDSYNC_*` environment variables take precedence over both.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `listen_addr` from config/env.
    #[arg(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    let engine = Engine::new(config.clone());
    engine.spawn_cleanup_task();

    tracing::info!(
        listen_addr = %config.listen_addr,
        sync_protocol_tag = %config.sync_protocol_tag,
        "starting worldsyncd"
    );

    tokio::select! {
        result = worldsync::client::accept_loop(engine, &config.listen_addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

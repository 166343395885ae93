//! ChunkVault upload store entry point.

mod app;
mod config;
mod routes;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkvault-server", version, about = "Resumable chunked upload store")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Overrides `bind_address` from the configuration file.
    #[arg(long)]
    bind: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting ChunkVault store"
    );

    let mut config = config::Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    tracing::info!(
        bind = %config.bind_address,
        root = %config.storage_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("store shut down cleanly");
    Ok(())
}

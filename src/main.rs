// main.rs

mod config;
mod controller;
mod embedding;
mod error;
mod product;
mod store;

use clap::Parser;
use config::Config;
use controller::{print_report, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting product-vector-db v{}", env!("CARGO_PKG_VERSION"));

    // Load, embed, store and verify
    let report = run(&config).await?;
    print_report(&report);

    Ok(())
}

use clap::Parser;
use mysql_transfer::{EngineConfig, TransferController};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "MySQL binlog change-data-capture transfer engine")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "transfer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(&args.config)?;

    let controller = TransferController::initialize(config).await?;
    controller.run().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, closing transfer engine");
    controller.close().await?;

    Ok(())
}

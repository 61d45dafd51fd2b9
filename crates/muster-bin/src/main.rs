//! # Muster Server Binary
//!
//! Main entrypoint for the Muster inventory and access-control server.

use anyhow::Result;
use clap::Parser;
use muster_bin::setup;
use muster_config::Config;

#[derive(Parser, Debug)]
#[command(name = "musterd")]
#[command(about = "Muster inventory and access-control engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "muster.yaml")]
    config: String,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load_or_default(&args.config);

    // Override with CLI args
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Validate configuration
    if let Err(e) = muster_config::validate(&config) {
        eprintln!("Configuration validation error: {e}");
        std::process::exit(1);
    }

    // Initialize observability
    muster_observe::init_tracing(&config.observability.log_level)?;

    tracing::info!("Starting Muster inventory and access-control engine");

    if config.observability.metrics_enabled {
        muster_observe::init_metrics(config.observability.metrics_port)?;
    }

    // Assemble components
    let state = setup::build_state(&config)?;
    setup::spawn_cache_stats_task(&state);

    // Start API server
    muster_api::serve(state, &config.server.host, config.server.port).await?;

    Ok(())
}

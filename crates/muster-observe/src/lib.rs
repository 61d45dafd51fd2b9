//! # Muster Observe - Observability Layer
//!
//! Structured logging and Prometheus metrics for the Muster daemon.

#![deny(unsafe_code)]

pub mod metrics;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from `RUST_LOG`, falling back to the given directive.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(fallback: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));

    if subscriber.try_init().is_err() {
        tracing::debug!("Tracing already initialized, skipping");
        return Ok(());
    }

    tracing::info!("Tracing initialized");

    Ok(())
}

/// Install the Prometheus exporter, serving scrapes on the given port.
pub fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    metrics::init_metrics_descriptions();

    tracing::info!(port = port, "Metrics exporter initialized");

    Ok(())
}

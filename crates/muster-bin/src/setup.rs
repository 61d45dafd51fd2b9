//! Component assembly from configuration.
//!
//! Builds the storage, schema, resolution, and ingestion components the
//! server runs with, applying configured limits and rules. Assembly is
//! pure wiring; it performs no I/O beyond reading the optional schema
//! file.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use muster_api::AppState;
use muster_cache::CheckCache;
use muster_config::Config;
use muster_core::{ResolveLimits, Resolver, SchemaRegistry};
use muster_ingest::{Ingestor, Projection, ProjectionTable, ReporterRegistry};
use muster_store::{MemoryBackend, MusterStore};

/// Build the reporter registry from configured entries.
///
/// No entries leaves the registry open: any reporter may report any
/// resource type.
pub fn reporter_registry(config: &Config) -> ReporterRegistry {
    let mut registry = ReporterRegistry::new();
    for entry in &config.ingest.reporters {
        registry =
            registry.with_reporter(entry.reporter_type.clone(), entry.resource_types.clone());
    }
    registry
}

/// Build the projection table from configured rules.
pub fn projection_table(config: &Config) -> ProjectionTable {
    let mut table = ProjectionTable::new();
    for entry in &config.ingest.projections {
        table = table.with_projection(Projection::new(
            entry.resource_type.clone(),
            entry.attribute.clone(),
            entry.relation.clone(),
            entry.subject_type.clone(),
        ));
    }
    table
}

/// Publish the configured schema file, if one is set.
///
/// Returns the published version, or `None` when no file is configured
/// and the registry keeps its built-in empty schema.
pub fn publish_boot_schema(registry: &SchemaRegistry, config: &Config) -> Result<Option<u64>> {
    let Some(path) = &config.schema_file else {
        return Ok(None);
    };

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    let version = registry
        .publish(&source)
        .with_context(|| format!("Failed to publish schema from {}", path.display()))?;
    Ok(Some(version))
}

/// Assemble the application state from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
    let store: Arc<dyn MusterStore> = Arc::new(MemoryBackend::new());
    tracing::info!("Using in-memory storage backend");

    let registry = Arc::new(SchemaRegistry::new());
    match publish_boot_schema(&registry, config)? {
        Some(version) => tracing::info!(version, "Schema published from file"),
        None => tracing::info!("No schema file configured, starting with the empty schema"),
    }

    let cache = if config.cache.enabled {
        tracing::info!(
            max_capacity = config.cache.max_capacity,
            ttl_seconds = config.cache.ttl_seconds,
            "Check cache enabled"
        );
        Some(Arc::new(CheckCache::new(
            config.cache.max_capacity,
            Duration::from_secs(config.cache.ttl_seconds),
        )))
    } else {
        tracing::info!("Check cache disabled");
        None
    };

    let limits = ResolveLimits {
        max_depth: config.resolver.max_depth,
        max_fanout: config.resolver.max_fanout,
        max_concurrency: config.resolver.max_concurrency,
    };
    let mut resolver =
        Resolver::new(Arc::clone(&store), Arc::clone(&registry)).with_limits(limits);
    if let Some(cache) = &cache {
        resolver = resolver.with_cache(Arc::clone(cache));
    }

    let reporters = reporter_registry(config);
    if reporters.is_open() {
        tracing::warn!("No reporters configured, accepting reports from any reporter type");
    }
    let ingestor = Ingestor::new(Arc::clone(&store), Arc::clone(&registry))
        .with_reporters(reporters)
        .with_projections(projection_table(config));

    Ok(AppState::new(store, registry, resolver, ingestor, cache))
}

/// Periodically export cache statistics as gauges.
///
/// No-op when the cache is disabled.
pub fn spawn_cache_stats_task(state: &AppState) {
    let Some(cache) = state.cache.clone() else {
        return;
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let stats = cache.stats();
            muster_observe::metrics::update_cache_stats(stats.entries, stats.hit_rate);
        }
    });
}

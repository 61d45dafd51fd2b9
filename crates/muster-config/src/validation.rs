//! Configuration validation
//!
//! Rejects values the daemon cannot run with before any component starts.

use crate::{
    CacheConfig, Config, IngestConfig, ObservabilityConfig, ResolverConfig, ServerConfig,
    StoreConfig,
};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port number: {0}")]
    InvalidPort(u16),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Invalid backend: {0} (must be: memory)")]
    InvalidBackend(String),

    #[error("Invalid cache capacity: {0} (must be > 0)")]
    InvalidCacheCapacity(u64),

    #[error("Invalid cache TTL: {0} (must be > 0)")]
    InvalidCacheTtl(u64),

    #[error("Invalid max depth: {0} (must be > 0)")]
    InvalidMaxDepth(usize),

    #[error("Invalid max fanout: {0} (must be > 0)")]
    InvalidMaxFanout(usize),

    #[error("Invalid max concurrency: {0} (must be > 0)")]
    InvalidMaxConcurrency(usize),

    #[error("Reporter type must be non-empty")]
    EmptyReporterType,

    #[error("Duplicate reporter type: {0}")]
    DuplicateReporter(String),

    #[error("Incomplete projection rule for attribute: {0:?}")]
    IncompleteProjection(String),

    #[error("Invalid log level: {0} (must be one of: trace, debug, info, warn, error)")]
    InvalidLogLevel(String),

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Validation result type
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate complete configuration
pub fn validate(config: &Config) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_server(&config.server) {
        errors.push(e);
    }

    if let Err(e) = validate_store(&config.store) {
        errors.push(e);
    }

    if let Err(e) = validate_cache(&config.cache) {
        errors.push(e);
    }

    if let Err(e) = validate_resolver(&config.resolver) {
        errors.push(e);
    }

    if let Err(e) = validate_ingest(&config.ingest) {
        errors.push(e);
    }

    if let Err(e) = validate_observability(&config.observability) {
        errors.push(e);
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Validate server configuration
pub fn validate_server(config: &ServerConfig) -> ValidationResult<()> {
    if config.port == 0 {
        return Err(ValidationError::InvalidPort(config.port));
    }

    if config.host.is_empty() {
        return Err(ValidationError::InvalidHost(config.host.clone()));
    }

    Ok(())
}

/// Validate store configuration
pub fn validate_store(config: &StoreConfig) -> ValidationResult<()> {
    match config.backend.as_str() {
        "memory" => Ok(()),
        _ => Err(ValidationError::InvalidBackend(config.backend.clone())),
    }
}

/// Validate cache configuration
pub fn validate_cache(config: &CacheConfig) -> ValidationResult<()> {
    if config.enabled {
        if config.max_capacity == 0 {
            return Err(ValidationError::InvalidCacheCapacity(config.max_capacity));
        }

        if config.ttl_seconds == 0 {
            return Err(ValidationError::InvalidCacheTtl(config.ttl_seconds));
        }
    }

    Ok(())
}

/// Validate resolver limits
pub fn validate_resolver(config: &ResolverConfig) -> ValidationResult<()> {
    if config.max_depth == 0 {
        return Err(ValidationError::InvalidMaxDepth(config.max_depth));
    }

    if config.max_fanout == 0 {
        return Err(ValidationError::InvalidMaxFanout(config.max_fanout));
    }

    if config.max_concurrency == 0 {
        return Err(ValidationError::InvalidMaxConcurrency(config.max_concurrency));
    }

    Ok(())
}

/// Validate ingestion configuration
pub fn validate_ingest(config: &IngestConfig) -> ValidationResult<()> {
    let mut seen = HashSet::new();
    for reporter in &config.reporters {
        if reporter.reporter_type.is_empty() {
            return Err(ValidationError::EmptyReporterType);
        }

        if !seen.insert(reporter.reporter_type.as_str()) {
            return Err(ValidationError::DuplicateReporter(reporter.reporter_type.clone()));
        }
    }

    for projection in &config.projections {
        let complete = !projection.resource_type.is_empty()
            && !projection.attribute.is_empty()
            && !projection.relation.is_empty()
            && !projection.subject_type.is_empty();
        if !complete {
            return Err(ValidationError::IncompleteProjection(projection.attribute.clone()));
        }
    }

    Ok(())
}

/// Validate observability configuration
pub fn validate_observability(config: &ObservabilityConfig) -> ValidationResult<()> {
    match config.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::InvalidLogLevel(config.log_level.clone())),
    }
}

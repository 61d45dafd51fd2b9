//! # Muster Config - Configuration Management
//!
//! Layered configuration for the Muster daemon: an optional config file
//! merged with `MUSTER__`-prefixed environment variables. Every field has a
//! default, so the daemon boots with no configuration at all.

#![deny(unsafe_code)]

pub mod validation;

pub use validation::{ValidationError, validate};

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Schema source published at boot, if set.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
}

/// Check cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

/// Resolver traversal limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Reporter ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Registered reporters. Leaving this empty runs the registry open.
    #[serde(default)]
    pub reporters: Vec<ReporterEntry>,

    /// Attribute-to-relation projection rules.
    #[serde(default)]
    pub projections: Vec<ProjectionEntry>,
}

/// One registered reporter and the resource types it may report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterEntry {
    pub reporter_type: String,

    /// `None` leaves the reporter unrestricted.
    #[serde(default)]
    pub resource_types: Option<Vec<String>>,
}

/// One attribute-to-relation projection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionEntry {
    pub resource_type: String,
    pub attribute: String,
    pub relation: String,
    pub subject_type: String,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// ============================================================================
// Defaults
// ============================================================================

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_depth() -> usize {
    32
}

fn default_max_fanout() -> usize {
    256
}

fn default_max_concurrency() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            ingest: IngestConfig::default(),
            observability: ObservabilityConfig::default(),
            schema_file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_backend() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_fanout: default_max_fanout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration from a file merged with environment variables.
    ///
    /// The file is optional. Environment variables use the `MUSTER__` prefix
    /// with `__` as the section separator (for example `MUSTER__SERVER__PORT`)
    /// and override file values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix("MUSTER").separator("__"))
            .build()?;
        config.try_deserialize()
    }

    /// Load configuration, falling back to defaults when loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

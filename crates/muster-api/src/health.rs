//! Health check endpoints for Kubernetes probes
//!
//! Provides liveness and readiness probes for container orchestration.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use muster_cache::CheckCache;
use muster_core::SchemaRegistry;
use muster_store::MusterStore;
use serde::{Deserialize, Serialize};

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but functional
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Timestamp of the response
    pub timestamp: u64,
    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Detailed health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Storage backend status
    pub storage: ComponentStatus,
    /// Schema registry status
    pub schema: ComponentStatus,
    /// Check cache status
    pub cache: ComponentStatus,
}

/// Component health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Component status
    pub status: HealthStatus,
    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health tracker for the service
#[derive(Clone)]
pub struct HealthTracker {
    /// Service start time
    start_time: Arc<AtomicU64>,
    /// Is service ready?
    ready: Arc<AtomicBool>,
    /// Is service alive?
    alive: Arc<AtomicBool>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    /// Create a new health tracker
    pub fn new() -> Self {
        Self {
            start_time: Arc::new(AtomicU64::new(unix_now())),
            ready: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        let start = self.start_time.load(Ordering::Relaxed);
        unix_now().saturating_sub(start)
    }

    /// Mark service as ready
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark service as alive/dead
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Check if service is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Perform a comprehensive health check
    pub async fn check_health(
        &self,
        store: &Arc<dyn MusterStore>,
        registry: &SchemaRegistry,
        cache: Option<&CheckCache>,
    ) -> HealthResponse {
        let uptime = self.uptime_seconds();
        let timestamp = unix_now();

        // Check storage health with a head-revision read
        let storage_status =
            match tokio::time::timeout(Duration::from_secs(1), store.head_revision()).await {
                Ok(Ok(revision)) => ComponentStatus {
                    status: HealthStatus::Healthy,
                    message: Some(format!("Storage operational at revision {revision}")),
                },
                Ok(Err(e)) => ComponentStatus {
                    status: HealthStatus::Unhealthy,
                    message: Some(format!("Storage error: {e}")),
                },
                Err(_) => ComponentStatus {
                    status: HealthStatus::Degraded,
                    message: Some("Storage timeout".to_string()),
                },
            };

        // Version 0 is the built-in empty schema
        let snapshot = registry.snapshot();
        let schema_status = if snapshot.version == 0 {
            ComponentStatus {
                status: HealthStatus::Degraded,
                message: Some("No schema published".to_string()),
            }
        } else {
            ComponentStatus {
                status: HealthStatus::Healthy,
                message: Some(format!("Schema version {}", snapshot.version)),
            }
        };

        let cache_status = match cache {
            Some(cache) => {
                let stats = cache.stats();
                ComponentStatus {
                    status: HealthStatus::Healthy,
                    message: Some(format!("{} entries cached", stats.entries)),
                }
            },
            None => ComponentStatus {
                status: HealthStatus::Healthy,
                message: Some("Cache disabled".to_string()),
            },
        };

        // Determine overall status
        let overall_status =
            if !self.is_alive() || matches!(storage_status.status, HealthStatus::Unhealthy) {
                HealthStatus::Unhealthy
            } else if !self.is_ready() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };

        HealthResponse {
            status: overall_status,
            service: "muster".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            timestamp,
            details: Some(HealthDetails {
                storage: storage_status,
                schema: schema_status,
                cache: cache_status,
            }),
        }
    }
}

/// Liveness probe handler
///
/// Indicates whether the service is running. If this fails, Kubernetes will restart the pod.
/// This should only fail if the service is completely broken (e.g., deadlock, panic).
pub async fn liveness_handler(State(state): State<crate::AppState>) -> impl IntoResponse {
    let tracker = &state.health_tracker;
    if tracker.is_alive() {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "alive",
                "service": "muster",
                "uptime_seconds": tracker.uptime_seconds()
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "dead",
                "service": "muster"
            })),
        )
    }
}

/// Readiness probe handler
///
/// Indicates whether the service is ready to accept traffic.
/// If this fails, Kubernetes will remove the pod from the load balancer.
pub async fn readiness_handler(State(state): State<crate::AppState>) -> impl IntoResponse {
    let health = state
        .health_tracker
        .check_health(&state.store, &state.registry, state.cache.as_deref())
        .await;

    match health.status {
        // Degraded still serves traffic
        HealthStatus::Healthy | HealthStatus::Degraded => (StatusCode::OK, Json(health)),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, Json(health)),
    }
}

/// Full health check endpoint
pub async fn health_handler(State(state): State<crate::AppState>) -> impl IntoResponse {
    let health = state
        .health_tracker
        .check_health(&state.store, &state.registry, state.cache.as_deref())
        .await;

    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => (StatusCode::OK, Json(health)),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, Json(health)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use muster_store::MemoryBackend;

    use super::*;

    const SCHEMA: &str = "
        type principal { }

        type host {
            relation owner
            relation viewer: this | owner
        }
    ";

    #[test]
    fn test_tracker_initial_state() {
        let tracker = HealthTracker::new();

        assert!(tracker.is_alive());
        assert!(!tracker.is_ready());
    }

    #[test]
    fn test_tracker_transitions() {
        let tracker = HealthTracker::new();

        tracker.set_ready(true);
        assert!(tracker.is_ready());

        tracker.set_alive(false);
        assert!(!tracker.is_alive());

        tracker.set_ready(false);
        assert!(!tracker.is_ready());
    }

    #[test]
    fn test_tracker_shared_across_clones() {
        let tracker = HealthTracker::new();
        let clone = tracker.clone();

        tracker.set_ready(true);
        assert!(clone.is_ready());
    }

    #[tokio::test]
    async fn test_check_health_healthy() {
        let store: Arc<dyn MusterStore> = Arc::new(MemoryBackend::new());
        let registry = SchemaRegistry::with_schema(SCHEMA).unwrap();
        let tracker = HealthTracker::new();
        tracker.set_ready(true);

        let health = tracker.check_health(&store, &registry, None).await;

        assert!(matches!(health.status, HealthStatus::Healthy));
        assert_eq!(health.service, "muster");
        let details = health.details.unwrap();
        assert!(matches!(details.storage.status, HealthStatus::Healthy));
        assert!(matches!(details.schema.status, HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_check_health_degraded_before_ready() {
        let store: Arc<dyn MusterStore> = Arc::new(MemoryBackend::new());
        let registry = SchemaRegistry::new();
        let tracker = HealthTracker::new();

        let health = tracker.check_health(&store, &registry, None).await;

        assert!(matches!(health.status, HealthStatus::Degraded));
        let details = health.details.unwrap();
        assert!(matches!(details.schema.status, HealthStatus::Degraded));
    }

    #[tokio::test]
    async fn test_check_health_unhealthy_when_not_alive() {
        let store: Arc<dyn MusterStore> = Arc::new(MemoryBackend::new());
        let registry = SchemaRegistry::with_schema(SCHEMA).unwrap();
        let tracker = HealthTracker::new();
        tracker.set_ready(true);
        tracker.set_alive(false);

        let health = tracker.check_health(&store, &registry, None).await;

        assert!(matches!(health.status, HealthStatus::Unhealthy));
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}

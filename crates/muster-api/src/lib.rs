//! # Muster API - REST Server
//!
//! HTTP surface of the Muster inventory and access-control engine:
//! resource reports and deletes, permission checks, relation expansion,
//! schema publishing, and health probes, all under `/v1`.
//!
//! Every successful response carries a consistency token; playing it
//! back with `at_least_as_fresh` guarantees the follow-up request never
//! observes older state.

#![deny(unsafe_code)]

pub mod handlers;
pub mod health;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{compression::CompressionLayer, cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing::info;

use muster_cache::CheckCache;
use muster_core::{ResolveError, Resolver, SchemaError, SchemaRegistry};
use muster_ingest::{IngestError, Ingestor};
use muster_store::MusterStore;
use muster_types::StoreError;

// ============================================================================
// Error Handling
// ============================================================================

/// Error payload returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,
    /// Stable machine-readable code
    pub code: String,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// The response status and stable error code for this error.
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Schema(_) => (StatusCode::BAD_REQUEST, "invalid_schema"),
            ApiError::Resolve(err) => classify_resolve(err),
            ApiError::Ingest(err) => match err {
                IngestError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                IngestError::UnknownReporterType(_) => {
                    (StatusCode::BAD_REQUEST, "unknown_reporter_type")
                },
                IngestError::UnknownResourceType { .. } => {
                    (StatusCode::BAD_REQUEST, "unknown_resource_type")
                },
                IngestError::Store(err) => classify_store(err),
            },
            ApiError::Store(err) => classify_store(err),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

fn classify_resolve(err: &ResolveError) -> (StatusCode, &'static str) {
    match err {
        ResolveError::UnknownObjectType(_) => (StatusCode::BAD_REQUEST, "unknown_object_type"),
        ResolveError::UnknownRelation { .. } => (StatusCode::BAD_REQUEST, "unknown_relation"),
        ResolveError::InvalidToken(_) => (StatusCode::BAD_REQUEST, "invalid_token"),
        ResolveError::DepthExceeded { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "depth_exceeded")
        },
        ResolveError::FanoutExceeded { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "fanout_exceeded")
        },
        ResolveError::Store(err) => classify_store(err),
        ResolveError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn classify_store(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::RevisionNotAvailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "revision_not_available")
        },
        StoreError::IdentityConflict { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "identity_conflict")
        },
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();

        if status.is_server_error() {
            tracing::error!("API error ({code}): {self}");
        } else {
            tracing::debug!("API error ({code}): {self}");
        }

        let body = Json(ErrorResponse { error: self.to_string(), code: code.to_string() });
        let mut response = (status, body).into_response();
        // 503s are transient; tell clients when to come back
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state across API handlers
#[derive(Clone)]
pub struct AppState {
    /// Tuple and resource storage
    pub store: Arc<dyn MusterStore>,
    /// Active schema registry
    pub registry: Arc<SchemaRegistry>,
    /// Check and expand evaluation
    pub resolver: Arc<Resolver>,
    /// Reporter ingestion pipeline
    pub ingestor: Arc<Ingestor>,
    /// Check cache, when enabled
    pub cache: Option<Arc<CheckCache>>,
    /// Health state tracker
    pub health_tracker: Arc<health::HealthTracker>,
}

impl AppState {
    /// Create application state from assembled components
    pub fn new(
        store: Arc<dyn MusterStore>,
        registry: Arc<SchemaRegistry>,
        resolver: Resolver,
        ingestor: Ingestor,
        cache: Option<Arc<CheckCache>>,
    ) -> Self {
        Self {
            store,
            registry,
            resolver: Arc::new(resolver),
            ingestor: Arc::new(ingestor),
            cache,
            health_tracker: Arc::new(health::HealthTracker::new()),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router with all routes configured
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/resources/report", post(handlers::report::report_handler))
        .route("/v1/resources/delete", post(handlers::report::delete_handler))
        .route("/v1/check", post(handlers::check::check_handler))
        .route("/v1/expand", post(handlers::expand::expand_handler))
        .route(
            "/v1/schema",
            post(handlers::schema::publish_schema_handler)
                .get(handlers::schema::get_schema_handler),
        );

    let health_routes = Router::new()
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::liveness_handler))
        .route("/health/ready", get(health::readiness_handler));

    api_routes
        .merge(health_routes)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Server
// ============================================================================

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    info!("Shutdown signal received, draining connections...");
}

/// Start the REST API server
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    // Mark service as ready to accept traffic
    state.health_tracker.set_ready(true);

    let app = create_router(state);

    let addr = format!("{host}:{port}");
    info!("Starting REST API server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

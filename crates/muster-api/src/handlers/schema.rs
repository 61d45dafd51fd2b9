//! Handlers for publishing and fetching the active schema.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppState, Result};

/// Request body for a schema publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSchemaBody {
    /// Schema source text
    pub source: String,
}

/// Response for a schema publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSchemaResponse {
    /// Version assigned to the published schema
    pub version: u64,
}

/// Response for a schema fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    /// Version of the active schema, 0 for the built-in empty schema
    pub version: u64,
    /// Source text of the active schema
    pub source: String,
}

/// Handler for `POST /v1/schema`
///
/// Parses, validates, and atomically activates a new schema. A
/// rejected schema leaves the active one untouched. In-flight checks
/// keep the snapshot they started with.
#[tracing::instrument(skip(state, body))]
pub async fn publish_schema_handler(
    State(state): State<AppState>,
    Json(body): Json<PublishSchemaBody>,
) -> Result<Json<PublishSchemaResponse>> {
    let start = std::time::Instant::now();

    let version = state.registry.publish(&body.source)?;
    info!(version, "Schema published");

    muster_observe::metrics::record_api_request(
        "/v1/schema",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(PublishSchemaResponse { version }))
}

/// Handler for `GET /v1/schema`
///
/// Returns the active schema version and source.
#[tracing::instrument(skip(state))]
pub async fn get_schema_handler(State(state): State<AppState>) -> Result<Json<SchemaResponse>> {
    let start = std::time::Instant::now();

    let snapshot = state.registry.snapshot();
    let response =
        SchemaResponse { version: snapshot.version, source: snapshot.source.clone() };

    muster_observe::metrics::record_api_request(
        "/v1/schema",
        "GET",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(response))
}

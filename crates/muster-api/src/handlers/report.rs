//! POST handlers for resource reports and deletes.

use axum::{Json, extract::State};
use muster_types::{AttributeMap, ReportMetadata, ReportRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AppState, Result};

/// Request body for a resource report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBody {
    /// Reporter submitting the representation
    pub reporter_type: String,
    /// Instance of the reporter, for multi-instance reporters
    pub reporter_instance_id: String,
    /// Schema type of the reported resource
    pub resource_type: String,
    /// The reported representations
    pub representations: Representations,
}

/// Representation envelope of a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Representations {
    /// Identity and provenance of this report
    pub metadata: RepresentationMetadata,
    /// Attributes shared across reporters
    #[serde(default)]
    pub common: AttributeMap,
    /// Attributes private to this reporter
    #[serde(default)]
    pub reporter: AttributeMap,
}

/// Identity and provenance fields of a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepresentationMetadata {
    /// The reporter's own id for the resource
    pub local_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_version: Option<String>,
}

/// Response for a resource report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Canonical id: minted on first report, stable afterwards
    pub resource_id: String,
    /// Consistency token for the committed write
    pub token: String,
}

/// Request body for a resource delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBody {
    /// Reporter that originally reported the resource
    pub reporter_type: String,
    /// The reporter's own id for the resource
    pub local_resource_id: String,
}

/// Response for a resource delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Consistency token for the committed delete, or for head when the
    /// resource was already gone
    pub token: String,
}

/// Handler for `POST /v1/resources/report`
///
/// Upserts the reporter's representation of a resource and refreshes
/// the relation tuples projected from its attributes. Re-reporting the
/// same local id updates the same canonical resource.
#[tracing::instrument(skip(state, body), fields(
    reporter_type = %body.reporter_type,
    resource_type = %body.resource_type,
))]
pub async fn report_handler(
    State(state): State<AppState>,
    Json(body): Json<ReportBody>,
) -> Result<Json<ReportResponse>> {
    let start = std::time::Instant::now();

    let metadata = ReportMetadata {
        api_href: body.representations.metadata.api_href,
        console_href: body.representations.metadata.console_href,
        reporter_version: body.representations.metadata.reporter_version,
    };
    let request = ReportRequest::builder()
        .reporter_type(body.reporter_type)
        .reporter_instance_id(body.reporter_instance_id)
        .resource_type(body.resource_type)
        .local_resource_id(body.representations.metadata.local_resource_id)
        .common(body.representations.common)
        .reporter(body.representations.reporter)
        .metadata(metadata)
        .build();

    let outcome = state.ingestor.report(request).await?;
    let token = state.resolver.tokens().issue(outcome.revision).into_string();

    muster_observe::metrics::record_api_request(
        "/v1/resources/report",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(ReportResponse { resource_id: outcome.resource_id, token }))
}

/// Handler for `POST /v1/resources/delete`
///
/// Soft-deletes the resource a reporter previously reported and clears
/// its tuples. Deleting an unknown or already-deleted resource succeeds
/// with a token for head, so retries are safe.
#[tracing::instrument(skip(state, body), fields(reporter_type = %body.reporter_type))]
pub async fn delete_handler(
    State(state): State<AppState>,
    Json(body): Json<DeleteBody>,
) -> Result<Json<DeleteResponse>> {
    let start = std::time::Instant::now();

    let deleted = state.ingestor.delete(&body.reporter_type, &body.local_resource_id).await?;
    let revision = match deleted {
        Some(revision) => revision,
        None => {
            debug!("Nothing to delete, answering with head");
            state.store.head_revision().await?
        },
    };
    let token = state.resolver.tokens().issue(revision).into_string();

    muster_observe::metrics::record_api_request(
        "/v1/resources/delete",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(DeleteResponse { token }))
}

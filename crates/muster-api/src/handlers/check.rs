//! POST handler for permission checks.

use axum::{Json, extract::State};
use muster_types::{CheckRequest, ConsistencyMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ApiError, AppState, Result,
    handlers::{
        ConsistencyBody, ResourceIdentifier, SubjectIdentifier, consistency_parts, head_token,
    },
};

/// Request body for a permission check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckBody {
    /// Object the relation is checked on
    pub object: ResourceIdentifier,
    /// Relation to check
    pub relation: String,
    /// Subject that may hold the relation
    pub subject: SubjectIdentifier,
    /// Requested read consistency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyBody>,
}

/// Response for a permission check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Whether the subject holds the relation
    pub allowed: bool,
    /// Consistency token for the evaluated revision
    pub token: String,
}

/// Handler for `POST /v1/check`
///
/// Evaluates whether the subject holds the relation on the object.
/// Either side may be addressed by reporter-local id; an id no reporter
/// ever claimed evaluates to a denial, the same as a deleted resource.
#[tracing::instrument(skip(state, body), fields(relation = %body.relation))]
pub async fn check_handler(
    State(state): State<AppState>,
    Json(body): Json<CheckBody>,
) -> Result<Json<CheckResponse>> {
    let start = std::time::Instant::now();

    body.object.validate()?;
    body.subject.validate()?;
    if body.relation.is_empty() {
        return Err(ApiError::InvalidRequest("relation cannot be empty".to_string()));
    }

    let (mode, token) = consistency_parts(body.consistency);

    let Some(object) = body.object.resolve(&state).await? else {
        debug!(resource_id = %body.object.resource_id, "Object id unknown to identity index");
        return deny_at_head(&state, mode, token.as_deref(), start).await;
    };
    let Some(subject) = body.subject.resolve(&state).await? else {
        debug!(resource_id = %body.subject.resource_id, "Subject id unknown to identity index");
        return deny_at_head(&state, mode, token.as_deref(), start).await;
    };

    let request = CheckRequest::builder()
        .object(object)
        .relation(body.relation)
        .subject(subject)
        .maybe_token(token)
        .mode(mode)
        .build();

    let outcome = state.resolver.check(request).await?;
    let token = state.resolver.tokens().issue(outcome.revision).into_string();

    muster_observe::metrics::record_api_request(
        "/v1/check",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(CheckResponse { allowed: outcome.allowed(), token }))
}

/// Denial at head for ids outside the identity index.
async fn deny_at_head(
    state: &AppState,
    mode: ConsistencyMode,
    token: Option<&str>,
    start: std::time::Instant,
) -> Result<Json<CheckResponse>> {
    let token = head_token(state, mode, token).await?;

    muster_observe::metrics::record_api_request(
        "/v1/check",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(CheckResponse { allowed: false, token }))
}

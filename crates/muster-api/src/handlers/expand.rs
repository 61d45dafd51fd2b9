//! POST handler for relation expansion.

use axum::{Json, extract::State};
use muster_types::ExpandRequest;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ApiError, AppState, Result,
    handlers::{ConsistencyBody, ResourceIdentifier, consistency_parts, head_token},
};

/// Request body for a relation expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandBody {
    /// Object whose relation is expanded
    pub object: ResourceIdentifier,
    /// Relation to expand
    pub relation: String,
    /// Requested read consistency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyBody>,
}

/// Response for a relation expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandResponse {
    /// Subjects holding the relation, as `type:id` or `type:id#relation`
    pub subjects: Vec<String>,
    /// Consistency token for the evaluated revision
    pub token: String,
}

/// Handler for `POST /v1/expand`
///
/// Lists the subjects holding the relation on the object, with userset
/// and tupleset rewrites flattened. An object id no reporter ever
/// claimed expands to an empty set.
#[tracing::instrument(skip(state, body), fields(relation = %body.relation))]
pub async fn expand_handler(
    State(state): State<AppState>,
    Json(body): Json<ExpandBody>,
) -> Result<Json<ExpandResponse>> {
    let start = std::time::Instant::now();

    body.object.validate()?;
    if body.relation.is_empty() {
        return Err(ApiError::InvalidRequest("relation cannot be empty".to_string()));
    }

    let (mode, token) = consistency_parts(body.consistency);

    let Some(object) = body.object.resolve(&state).await? else {
        debug!(resource_id = %body.object.resource_id, "Object id unknown to identity index");
        let token = head_token(&state, mode, token.as_deref()).await?;

        muster_observe::metrics::record_api_request(
            "/v1/expand",
            "POST",
            200,
            start.elapsed().as_secs_f64(),
        );

        return Ok(Json(ExpandResponse { subjects: Vec::new(), token }));
    };

    let request = ExpandRequest::builder()
        .object(object)
        .relation(body.relation)
        .maybe_token(token)
        .mode(mode)
        .build();

    let outcome = state.resolver.expand(request).await?;
    let token = state.resolver.tokens().issue(outcome.revision).into_string();
    let subjects = outcome.subjects.iter().map(ToString::to_string).collect();

    muster_observe::metrics::record_api_request(
        "/v1/expand",
        "POST",
        200,
        start.elapsed().as_secs_f64(),
    );

    Ok(Json(ExpandResponse { subjects, token }))
}

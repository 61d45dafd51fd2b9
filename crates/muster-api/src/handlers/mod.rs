//! REST handlers for the Muster v1 API.

pub mod check;
pub mod expand;
pub mod report;
pub mod schema;

use muster_core::RevisionFloor;
use muster_types::{ConsistencyMode, ObjectRef, StoreError, SubjectRef};
use serde::{Deserialize, Serialize};

use crate::{ApiError, AppState, Result};

/// Wire identifier for the object position of a request.
///
/// A present `reporter_type` marks `resource_id` as reporter-local; it
/// is translated through the identity index before evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_type: Option<String>,
}

/// Wire identifier for the subject position of a request.
///
/// A present `relation` makes this a userset reference (for example the
/// members of a group) instead of a plain subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectIdentifier {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Requested read consistency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyBody {
    #[serde(default)]
    pub mode: ConsistencyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ResourceIdentifier {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_identifier_parts(
            "object",
            &self.resource_type,
            &self.resource_id,
            &self.reporter_type,
        )
    }

    /// Translate to a canonical object ref. `None` means the id is
    /// reporter-local and no reporter ever claimed it.
    pub(crate) async fn resolve(&self, state: &AppState) -> Result<Option<ObjectRef>> {
        match &self.reporter_type {
            Some(reporter_type) => {
                let canonical =
                    state.store.resolve_canonical(reporter_type, &self.resource_id).await?;
                Ok(canonical.map(|id| ObjectRef::new(self.resource_type.clone(), id)))
            },
            None => {
                Ok(Some(ObjectRef::new(self.resource_type.clone(), self.resource_id.clone())))
            },
        }
    }
}

impl SubjectIdentifier {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_identifier_parts(
            "subject",
            &self.resource_type,
            &self.resource_id,
            &self.reporter_type,
        )?;
        if matches!(&self.relation, Some(relation) if relation.is_empty()) {
            return Err(ApiError::InvalidRequest("subject relation cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Translate to a canonical subject ref, preserving a userset
    /// relation if one was given. `None` means the id is reporter-local
    /// and no reporter ever claimed it.
    pub(crate) async fn resolve(&self, state: &AppState) -> Result<Option<SubjectRef>> {
        let canonical = match &self.reporter_type {
            Some(reporter_type) => {
                match state.store.resolve_canonical(reporter_type, &self.resource_id).await? {
                    Some(id) => id,
                    None => return Ok(None),
                }
            },
            None => self.resource_id.clone(),
        };

        let subject = match &self.relation {
            Some(relation) => {
                SubjectRef::userset(self.resource_type.clone(), canonical, relation.clone())
            },
            None => SubjectRef::new(self.resource_type.clone(), canonical),
        };
        Ok(Some(subject))
    }
}

fn validate_identifier_parts(
    position: &str,
    resource_type: &str,
    resource_id: &str,
    reporter_type: &Option<String>,
) -> Result<()> {
    if resource_type.is_empty() {
        return Err(ApiError::InvalidRequest(format!("{position} resource_type cannot be empty")));
    }
    if resource_id.is_empty() {
        return Err(ApiError::InvalidRequest(format!("{position} resource_id cannot be empty")));
    }
    if matches!(reporter_type, Some(reporter) if reporter.is_empty()) {
        return Err(ApiError::InvalidRequest(format!("{position} reporter_type cannot be empty")));
    }
    Ok(())
}

pub(crate) fn consistency_parts(body: Option<ConsistencyBody>) -> (ConsistencyMode, Option<String>) {
    let body = body.unwrap_or_default();
    (body.mode, body.token)
}

/// Issue a token for the current head, honoring the request's floor.
///
/// Short-circuit responses (unresolvable reporter-local ids) never run
/// the resolver, so the floor check it would perform happens here. A
/// floor ahead of head fails with `RevisionNotAvailable`.
pub(crate) async fn head_token(
    state: &AppState,
    mode: ConsistencyMode,
    token: Option<&str>,
) -> Result<String> {
    let floor = state.resolver.tokens().floor_for_request(token, mode)?;
    let head = state.store.head_revision().await?;
    if let RevisionFloor::AtLeast(required) = floor {
        if required > head {
            return Err(ApiError::Store(StoreError::RevisionNotAvailable {
                requested: required,
                latest: head,
            }));
        }
    }
    Ok(state.resolver.tokens().issue(head).into_string())
}

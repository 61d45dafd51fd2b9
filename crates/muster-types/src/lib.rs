//! # Muster Types
//!
//! Shared type definitions for the Muster inventory and access-control
//! engine.
//!
//! This crate provides all core types used across the Muster workspace,
//! ensuring a single source of truth and preventing circular dependencies.

#![deny(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wildcard subject id, matching any subject of the same type.
pub const WILDCARD: &str = "*";

// ============================================================================
// Revision
// ============================================================================

/// A revision marking a point in the tuple store's history.
///
/// Strictly monotonic: every mutating store transaction advances it exactly
/// once. All reads bind to a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl Revision {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Core Domain Types
// ============================================================================

/// A canonical object reference: `(object type, object id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self { object_type: object_type.into(), object_id: object_id.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A subject reference, optionally carrying a subject relation.
///
/// A plain subject (`principal:sarah`) names one principal. A subject with a
/// relation (`group:eng#member`) names a userset: everyone holding `member`
/// on `group:eng`. The wildcard id (`principal:*`) matches any subject of
/// that type and never carries a relation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self { subject_type: subject_type.into(), subject_id: subject_id.into(), relation: None }
    }

    /// A userset subject: everyone holding `relation` on the named object.
    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: Some(relation.into()),
        }
    }

    /// The wildcard subject for a type, matching any id.
    pub fn wildcard(subject_type: impl Into<String>) -> Self {
        Self { subject_type: subject_type.into(), subject_id: WILDCARD.into(), relation: None }
    }

    pub fn is_wildcard(&self) -> bool {
        self.subject_id == WILDCARD
    }

    pub fn is_userset(&self) -> bool {
        self.relation.is_some()
    }

    /// Check whether this stored subject grants the queried subject.
    ///
    /// True on an exact match, or when this is a wildcard of the queried
    /// subject's type. Userset subjects never grant directly; the resolver
    /// recurses through them instead.
    pub fn grants(&self, other: &SubjectRef) -> bool {
        if self == other {
            return true;
        }
        self.relation.is_none() && self.is_wildcard() && self.subject_type == other.subject_type
    }

    /// View this subject as an object, for recursing into userset subjects.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(self.subject_type.clone(), self.subject_id.clone())
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(rel) => write!(f, "{}:{}#{}", self.subject_type, self.subject_id, rel),
            None => write!(f, "{}:{}", self.subject_type, self.subject_id),
        }
    }
}

/// A relationship tuple: object has relation to subject.
///
/// Unique on the full `(object type, object id, relation, subject type,
/// subject id, subject relation)` key. Tuples are append/remove only;
/// mutation is modeled as remove-old + add-new within one transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl RelationTuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self { object, relation: relation.into(), subject }
    }

    /// Validate field shapes: non-empty parts, wildcards only as a whole
    /// subject id, no relation on a wildcard subject.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.object.object_type.is_empty() || self.object.object_id.is_empty() {
            return Err("object type and id must be non-empty".to_string());
        }
        if self.relation.is_empty() {
            return Err("relation must be non-empty".to_string());
        }
        if self.subject.subject_type.is_empty() || self.subject.subject_id.is_empty() {
            return Err("subject type and id must be non-empty".to_string());
        }
        if self.object.object_type.contains('*')
            || self.object.object_id.contains('*')
            || self.relation.contains('*')
        {
            return Err("wildcards are only allowed in the subject id".to_string());
        }
        if self.subject.subject_id.contains('*') && self.subject.subject_id != WILDCARD {
            return Err("wildcard subject id must be exactly '*'".to_string());
        }
        if self.subject.is_wildcard() && self.subject.relation.is_some() {
            return Err("wildcard subjects cannot carry a relation".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

// ============================================================================
// Resource Records
// ============================================================================

/// Schema-agnostic attribute payload: string / number / bool / nested object
/// / null values under string keys.
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;

/// Reporter-supplied metadata accompanying a resource report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_version: Option<String>,
}

/// A canonical resource record as ingested from a reporter.
///
/// `resource_id` is the canonical id, stable for the lifetime of the
/// resource. The reporter identity `(reporter_type, local_resource_id)`
/// maps to it through the store's identity table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: String,
    pub resource_id: String,
    pub reporter_type: String,
    pub reporter_instance_id: String,
    pub local_resource_id: String,
    #[serde(default)]
    pub common: AttributeMap,
    #[serde(default)]
    pub reporter: AttributeMap,
    #[serde(default)]
    pub metadata: ReportMetadata,
    pub reported_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.resource_type.clone(), self.resource_id.clone())
    }
}

// ============================================================================
// Write Batches
// ============================================================================

/// An atomic, all-or-nothing store mutation.
///
/// One applied batch advances the revision exactly once. Resource upserts
/// double as identity claims: the backend verifies each record's
/// `(reporter_type, local_resource_id) -> resource_id` mapping under its
/// write lock and fails the whole batch on a mismatch.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub tuple_inserts: Vec<RelationTuple>,
    pub tuple_deletes: Vec<RelationTuple>,
    /// Remove every live tuple whose object matches, regardless of relation.
    pub object_clears: Vec<ObjectRef>,
    pub resource_upserts: Vec<ResourceRecord>,
    /// Soft-delete the named canonical resources.
    pub resource_tombstones: Vec<ObjectRef>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tuple(mut self, tuple: RelationTuple) -> Self {
        self.tuple_inserts.push(tuple);
        self
    }

    pub fn delete_tuple(mut self, tuple: RelationTuple) -> Self {
        self.tuple_deletes.push(tuple);
        self
    }

    pub fn clear_object(mut self, object: ObjectRef) -> Self {
        self.object_clears.push(object);
        self
    }

    pub fn upsert_resource(mut self, record: ResourceRecord) -> Self {
        self.resource_upserts.push(record);
        self
    }

    pub fn tombstone_resource(mut self, object: ObjectRef) -> Self {
        self.resource_tombstones.push(object);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_inserts.is_empty()
            && self.tuple_deletes.is_empty()
            && self.object_clears.is_empty()
            && self.resource_upserts.is_empty()
            && self.resource_tombstones.is_empty()
    }

    /// Validate every tuple in the batch before it reaches the backend.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for tuple in self.tuple_inserts.iter().chain(self.tuple_deletes.iter()) {
            tuple.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested revision is ahead of this store's replication state.
    /// Transient: safe to retry with backoff.
    #[error("revision {requested} not yet available (latest is {latest})")]
    RevisionNotAvailable { requested: Revision, latest: Revision },

    /// A concurrent writer installed a different canonical id for the same
    /// reporter-local identity. Transient: re-resolve and retry.
    #[error("canonical identity conflict for ({reporter_type}, {local_resource_id})")]
    IdentityConflict { reporter_type: String, local_resource_id: String },

    #[error("write batch is empty")]
    EmptyWrite,

    #[error("invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Decision Types
// ============================================================================

/// The result of a relation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Decision::Allow } else { Decision::Deny }
    }
}

// ============================================================================
// Consistency Types
// ============================================================================

/// How a caller wants staleness bounded for a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Serve from the latest revision this replica knows. Default.
    #[default]
    MinimizeLatency,
    /// Serve from a revision no older than the one a prior token names.
    AtLeastAsFresh,
}

// ============================================================================
// Request/Response Types - Check
// ============================================================================

/// A relation check request.
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct CheckRequest {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
    /// Consistency token from a previous response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub mode: ConsistencyMode,
}

/// A resolved check: the decision plus the revision it was computed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub decision: Decision,
    pub revision: Revision,
}

impl CheckOutcome {
    pub fn allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

// ============================================================================
// Request/Response Types - Expand
// ============================================================================

/// A request to expand a relation into its member subjects.
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct ExpandRequest {
    pub object: ObjectRef,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub mode: ConsistencyMode,
}

/// The expanded relation set, deduplicated and sorted, plus the revision it
/// was computed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandOutcome {
    pub subjects: Vec<SubjectRef>,
    pub revision: Revision,
}

// ============================================================================
// Request/Response Types - Report
// ============================================================================

/// A resource report from a reporter.
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct ReportRequest {
    pub reporter_type: String,
    pub reporter_instance_id: String,
    pub resource_type: String,
    pub local_resource_id: String,
    #[serde(default)]
    #[builder(default)]
    pub common: AttributeMap,
    #[serde(default)]
    #[builder(default)]
    pub reporter: AttributeMap,
    #[serde(default)]
    #[builder(default)]
    pub metadata: ReportMetadata,
}

/// Acknowledgement of an ingested report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutcome {
    /// Canonical resource id: minted on first report, stable afterwards.
    pub resource_id: String,
    pub revision: Revision,
}

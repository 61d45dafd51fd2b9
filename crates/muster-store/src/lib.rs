//! # Muster Store - Storage Abstraction Layer
//!
//! Abstract tuple and resource storage with revision consistency. Every
//! mutating batch advances a strictly monotonic revision; every read binds
//! to one.

#![deny(unsafe_code)]

use async_trait::async_trait;
use muster_types::{ObjectRef, RelationTuple, ResourceRecord, Revision, StoreResult, WriteBatch};

pub mod memory;

pub use memory::MemoryBackend;

type Result<T> = StoreResult<T>;

/// The abstract relationship tuple store interface.
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Apply a batch atomically and return the new revision.
    ///
    /// Writers are serialized by the backend; no two batches share a
    /// revision, and revision order is a valid serialization order. Empty
    /// batches are rejected with `StoreError::EmptyWrite`.
    async fn write(&self, batch: WriteBatch) -> Result<Revision>;

    /// Read the tuples for `(object, relation)` as of `at`.
    ///
    /// Fails with `StoreError::RevisionNotAvailable` when `at` is ahead of
    /// this store's state, never silently serving stale data.
    async fn read(
        &self,
        object: &ObjectRef,
        relation: &str,
        at: Revision,
    ) -> Result<Vec<RelationTuple>>;

    /// Reverse lookup: every tuple whose subject is `(subject_type,
    /// subject_id)` (with any or no subject relation) as of `at`.
    async fn read_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        at: Revision,
    ) -> Result<Vec<RelationTuple>>;

    /// The latest revision this store has applied.
    async fn head_revision(&self) -> Result<Revision>;
}

/// Canonical resource records and the reporter identity map.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Look up the canonical resource id for a reporter-local identity.
    async fn resolve_canonical(
        &self,
        reporter_type: &str,
        local_resource_id: &str,
    ) -> Result<Option<String>>;

    /// Fetch a resource record as of `at`. Soft-deleted records resolve to
    /// `None`.
    async fn get_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        at: Revision,
    ) -> Result<Option<ResourceRecord>>;

    /// Fetch a live resource record by canonical id alone. Canonical ids
    /// are minted globally unique, so no type qualifier is needed.
    async fn find_resource(
        &self,
        resource_id: &str,
        at: Revision,
    ) -> Result<Option<ResourceRecord>>;

    /// List live resource records of a type as of `at`, ordered by
    /// canonical id.
    async fn list_resources(
        &self,
        resource_type: &str,
        at: Revision,
    ) -> Result<Vec<ResourceRecord>>;
}

/// The combined store interface the engine is wired against.
pub trait MusterStore: TupleStore + ResourceStore {}

impl<T: TupleStore + ResourceStore> MusterStore for T {}

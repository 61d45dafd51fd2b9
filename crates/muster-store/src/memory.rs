//! In-memory storage backend for testing and development

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use muster_types::{
    ObjectRef, RelationTuple, ResourceRecord, Revision, StoreError, WriteBatch,
};
use tokio::sync::RwLock;

use crate::{Result, ResourceStore, TupleStore};

/// A tuple row with its version bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionedTuple {
    tuple: RelationTuple,
    created_at: Revision,
    deleted_at: Option<Revision>,
}

/// A resource record version. Re-reporting closes the previous version and
/// opens a new one at the write revision.
#[derive(Debug, Clone)]
struct VersionedResource {
    record: ResourceRecord,
    created_at: Revision,
    deleted_at: Option<Revision>,
}

/// Row visibility at a revision: created no later, not yet deleted.
fn visible(created_at: Revision, deleted_at: Option<Revision>, at: Revision) -> bool {
    created_at <= at && deleted_at.map_or(true, |d| d > at)
}

/// In-memory MVCC store with full indexing and revision support.
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

struct MemoryState {
    /// Primary storage: all tuple rows with their version history.
    tuples: Vec<VersionedTuple>,

    /// Index by (object type, object id, relation) for check reads.
    object_relation_index: HashMap<(String, String, String), Vec<usize>>,

    /// Index by (object type, object id) for whole-object clears.
    object_index: HashMap<(String, String), Vec<usize>>,

    /// Index by (subject type, subject id) for reverse lookups.
    subject_index: HashMap<(String, String), Vec<usize>>,

    /// Canonical (resource type, resource id) -> record version chain.
    resources: HashMap<(String, String), Vec<VersionedResource>>,

    /// (reporter type, local resource id) -> canonical resource id.
    /// Install-only: identity rows outlive soft-deleted records so a
    /// re-report resurrects the same canonical id.
    identities: HashMap<(String, String), String>,

    /// Current revision number.
    revision: Revision,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                tuples: Vec::new(),
                object_relation_index: HashMap::new(),
                object_index: HashMap::new(),
                subject_index: HashMap::new(),
                resources: HashMap::new(),
                identities: HashMap::new(),
                revision: Revision::zero(),
            })),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn insert_row(&mut self, tuple: RelationTuple, at: Revision) {
        let idx = self.tuples.len();
        let object_key = (tuple.object.object_type.clone(), tuple.object.object_id.clone());
        let relation_key =
            (object_key.0.clone(), object_key.1.clone(), tuple.relation.clone());
        let subject_key =
            (tuple.subject.subject_type.clone(), tuple.subject.subject_id.clone());

        self.tuples.push(VersionedTuple { tuple, created_at: at, deleted_at: None });
        self.object_relation_index.entry(relation_key).or_default().push(idx);
        self.object_index.entry(object_key).or_default().push(idx);
        self.subject_index.entry(subject_key).or_default().push(idx);
    }

    /// True when an equal tuple row would still be live at `at`.
    fn has_live_duplicate(&self, tuple: &RelationTuple, at: Revision) -> bool {
        let key = (
            tuple.object.object_type.clone(),
            tuple.object.object_id.clone(),
            tuple.relation.clone(),
        );
        self.object_relation_index.get(&key).map_or(false, |rows| {
            rows.iter().any(|&idx| {
                let row = &self.tuples[idx];
                row.tuple == *tuple && visible(row.created_at, row.deleted_at, at)
            })
        })
    }
}

#[async_trait]
impl TupleStore for MemoryBackend {
    async fn write(&self, batch: WriteBatch) -> Result<Revision> {
        if batch.is_empty() {
            return Err(StoreError::EmptyWrite);
        }
        batch.validate().map_err(StoreError::InvalidTuple)?;

        let mut state = self.state.write().await;

        // Verify identity claims before touching anything: a mismatched
        // claim fails the whole batch.
        for record in &batch.resource_upserts {
            let identity_key =
                (record.reporter_type.clone(), record.local_resource_id.clone());
            if let Some(existing) = state.identities.get(&identity_key) {
                if *existing != record.resource_id {
                    return Err(StoreError::IdentityConflict {
                        reporter_type: record.reporter_type.clone(),
                        local_resource_id: record.local_resource_id.clone(),
                    });
                }
            }
        }

        let next = state.revision.next();

        // Deletes and clears apply before inserts, so remove-old + add-new
        // of the same tuple within one batch nets to the tuple surviving.
        for tuple in &batch.tuple_deletes {
            let key = (
                tuple.object.object_type.clone(),
                tuple.object.object_id.clone(),
                tuple.relation.clone(),
            );
            if let Some(rows) = state.object_relation_index.get(&key).cloned() {
                for idx in rows {
                    let row = &mut state.tuples[idx];
                    if row.tuple == *tuple && row.deleted_at.is_none() {
                        row.deleted_at = Some(next);
                    }
                }
            }
        }

        for object in &batch.object_clears {
            let key = (object.object_type.clone(), object.object_id.clone());
            if let Some(rows) = state.object_index.get(&key).cloned() {
                for idx in rows {
                    let row = &mut state.tuples[idx];
                    if row.deleted_at.is_none() {
                        row.deleted_at = Some(next);
                    }
                }
            }
        }

        for tuple in batch.tuple_inserts {
            if state.has_live_duplicate(&tuple, next) {
                continue;
            }
            state.insert_row(tuple, next);
        }

        for record in batch.resource_upserts {
            let identity_key =
                (record.reporter_type.clone(), record.local_resource_id.clone());
            state.identities.entry(identity_key).or_insert_with(|| record.resource_id.clone());

            let resource_key = (record.resource_type.clone(), record.resource_id.clone());
            let versions = state.resources.entry(resource_key).or_default();
            if let Some(live) = versions.iter_mut().find(|v| v.deleted_at.is_none()) {
                live.deleted_at = Some(next);
            }
            versions.push(VersionedResource { record, created_at: next, deleted_at: None });
        }

        for object in &batch.resource_tombstones {
            let resource_key = (object.object_type.clone(), object.object_id.clone());
            if let Some(versions) = state.resources.get_mut(&resource_key) {
                for version in versions.iter_mut() {
                    if version.deleted_at.is_none() {
                        version.deleted_at = Some(next);
                    }
                }
            }
        }

        state.revision = next;
        Ok(next)
    }

    async fn read(
        &self,
        object: &ObjectRef,
        relation: &str,
        at: Revision,
    ) -> Result<Vec<RelationTuple>> {
        let state = self.state.read().await;
        if at > state.revision {
            return Err(StoreError::RevisionNotAvailable {
                requested: at,
                latest: state.revision,
            });
        }

        let key =
            (object.object_type.clone(), object.object_id.clone(), relation.to_string());
        let tuples = state
            .object_relation_index
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter_map(|&idx| {
                        let row = &state.tuples[idx];
                        visible(row.created_at, row.deleted_at, at)
                            .then(|| row.tuple.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(tuples)
    }

    async fn read_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        at: Revision,
    ) -> Result<Vec<RelationTuple>> {
        let state = self.state.read().await;
        if at > state.revision {
            return Err(StoreError::RevisionNotAvailable {
                requested: at,
                latest: state.revision,
            });
        }

        let key = (subject_type.to_string(), subject_id.to_string());
        let tuples = state
            .subject_index
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter_map(|&idx| {
                        let row = &state.tuples[idx];
                        visible(row.created_at, row.deleted_at, at)
                            .then(|| row.tuple.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(tuples)
    }

    async fn head_revision(&self) -> Result<Revision> {
        let state = self.state.read().await;
        Ok(state.revision)
    }
}

#[async_trait]
impl ResourceStore for MemoryBackend {
    async fn resolve_canonical(
        &self,
        reporter_type: &str,
        local_resource_id: &str,
    ) -> Result<Option<String>> {
        let state = self.state.read().await;
        let key = (reporter_type.to_string(), local_resource_id.to_string());
        Ok(state.identities.get(&key).cloned())
    }

    async fn get_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        at: Revision,
    ) -> Result<Option<ResourceRecord>> {
        let state = self.state.read().await;
        if at > state.revision {
            return Err(StoreError::RevisionNotAvailable {
                requested: at,
                latest: state.revision,
            });
        }

        let key = (resource_type.to_string(), resource_id.to_string());
        let record = state.resources.get(&key).and_then(|versions| {
            versions
                .iter()
                .find(|v| visible(v.created_at, v.deleted_at, at))
                .map(|v| v.record.clone())
        });

        Ok(record)
    }

    async fn find_resource(
        &self,
        resource_id: &str,
        at: Revision,
    ) -> Result<Option<ResourceRecord>> {
        let state = self.state.read().await;
        if at > state.revision {
            return Err(StoreError::RevisionNotAvailable {
                requested: at,
                latest: state.revision,
            });
        }

        let record = state
            .resources
            .iter()
            .filter(|((_, id), _)| id == resource_id)
            .find_map(|(_, versions)| {
                versions
                    .iter()
                    .find(|v| visible(v.created_at, v.deleted_at, at))
                    .map(|v| v.record.clone())
            });

        Ok(record)
    }

    async fn list_resources(
        &self,
        resource_type: &str,
        at: Revision,
    ) -> Result<Vec<ResourceRecord>> {
        let state = self.state.read().await;
        if at > state.revision {
            return Err(StoreError::RevisionNotAvailable {
                requested: at,
                latest: state.revision,
            });
        }

        let mut records: Vec<ResourceRecord> = state
            .resources
            .iter()
            .filter(|((rt, _), _)| rt == resource_type)
            .filter_map(|(_, versions)| {
                versions
                    .iter()
                    .find(|v| visible(v.created_at, v.deleted_at, at))
                    .map(|v| v.record.clone())
            })
            .collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use muster_types::SubjectRef;

    use super::*;

    fn tuple(object_id: &str, relation: &str, subject_id: &str) -> RelationTuple {
        RelationTuple::new(
            ObjectRef::new("document", object_id),
            relation,
            SubjectRef::new("principal", subject_id),
        )
    }

    fn record(resource_id: &str, local_id: &str, owner: &str) -> ResourceRecord {
        let mut reporter = muster_types::AttributeMap::new();
        reporter.insert("owner_id".to_string(), serde_json::Value::String(owner.to_string()));
        ResourceRecord {
            resource_type: "document".to_string(),
            resource_id: resource_id.to_string(),
            reporter_type: "drive".to_string(),
            reporter_instance_id: "drive-1".to_string(),
            local_resource_id: local_id.to_string(),
            common: muster_types::AttributeMap::new(),
            reporter,
            metadata: muster_types::ReportMetadata::default(),
            reported_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = MemoryBackend::new();
        let rev = store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();
        assert_eq!(rev, Revision(1));

        let tuples =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", rev).await.unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].subject, SubjectRef::new("principal", "sarah"));
    }

    #[tokio::test]
    async fn test_revision_isolation() {
        let store = MemoryBackend::new();
        let r1 = store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();
        let r2 = store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "alex")))
            .await
            .unwrap();

        let at_r1 =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r1).await.unwrap();
        assert_eq!(at_r1.len(), 1);

        let at_r2 =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r2).await.unwrap();
        assert_eq!(at_r2.len(), 2);
    }

    #[tokio::test]
    async fn test_read_ahead_of_head_fails() {
        let store = MemoryBackend::new();
        store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();

        let err = store
            .read(&ObjectRef::new("document", "doc-1"), "viewer", Revision(99))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionNotAvailable { requested: Revision(99), latest: Revision(1) }
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let store = MemoryBackend::new();
        let err = store.write(WriteBatch::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyWrite));
        assert_eq!(store.head_revision().await.unwrap(), Revision::zero());
    }

    #[tokio::test]
    async fn test_invalid_tuple_rejected() {
        let store = MemoryBackend::new();
        let bad = RelationTuple::new(
            ObjectRef::new("document", "doc-1"),
            "viewer",
            SubjectRef::userset("principal", "*", "member"),
        );
        let err = store.write(WriteBatch::new().insert_tuple(bad)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTuple(_)));
    }

    #[tokio::test]
    async fn test_duplicate_live_tuple_is_noop() {
        let store = MemoryBackend::new();
        store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();
        let r2 = store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();

        let tuples =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r2).await.unwrap();
        assert_eq!(tuples.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_tuple() {
        let store = MemoryBackend::new();
        let r1 = store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();
        let r2 = store
            .write(WriteBatch::new().delete_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();

        // Still visible at the old revision, gone at the new one.
        let at_r1 =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r1).await.unwrap();
        assert_eq!(at_r1.len(), 1);
        let at_r2 =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r2).await.unwrap();
        assert!(at_r2.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_add_same_tuple_one_batch() {
        let store = MemoryBackend::new();
        store
            .write(WriteBatch::new().insert_tuple(tuple("doc-1", "viewer", "sarah")))
            .await
            .unwrap();
        let r2 = store
            .write(
                WriteBatch::new()
                    .delete_tuple(tuple("doc-1", "viewer", "sarah"))
                    .insert_tuple(tuple("doc-1", "viewer", "sarah")),
            )
            .await
            .unwrap();

        let tuples =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r2).await.unwrap();
        assert_eq!(tuples.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_object_removes_all_relations() {
        let store = MemoryBackend::new();
        store
            .write(
                WriteBatch::new()
                    .insert_tuple(tuple("doc-1", "viewer", "sarah"))
                    .insert_tuple(tuple("doc-1", "owner", "alex"))
                    .insert_tuple(tuple("doc-2", "viewer", "sarah")),
            )
            .await
            .unwrap();
        let r2 = store
            .write(WriteBatch::new().clear_object(ObjectRef::new("document", "doc-1")))
            .await
            .unwrap();

        let doc1_viewer =
            store.read(&ObjectRef::new("document", "doc-1"), "viewer", r2).await.unwrap();
        let doc1_owner =
            store.read(&ObjectRef::new("document", "doc-1"), "owner", r2).await.unwrap();
        let doc2_viewer =
            store.read(&ObjectRef::new("document", "doc-2"), "viewer", r2).await.unwrap();
        assert!(doc1_viewer.is_empty());
        assert!(doc1_owner.is_empty());
        assert_eq!(doc2_viewer.len(), 1);
    }

    #[tokio::test]
    async fn test_read_by_subject() {
        let store = MemoryBackend::new();
        let rev = store
            .write(
                WriteBatch::new()
                    .insert_tuple(tuple("doc-1", "viewer", "sarah"))
                    .insert_tuple(tuple("doc-2", "owner", "sarah"))
                    .insert_tuple(tuple("doc-3", "viewer", "alex")),
            )
            .await
            .unwrap();

        let tuples = store.read_by_subject("principal", "sarah", rev).await.unwrap();
        assert_eq!(tuples.len(), 2);
        assert!(tuples.iter().all(|t| t.subject.subject_id == "sarah"));
    }

    #[tokio::test]
    async fn test_resource_upsert_keeps_history() {
        let store = MemoryBackend::new();
        let r1 = store
            .write(WriteBatch::new().upsert_resource(record("res-1", "doc-123", "user-1")))
            .await
            .unwrap();
        let r2 = store
            .write(WriteBatch::new().upsert_resource(record("res-1", "doc-123", "user-2")))
            .await
            .unwrap();

        let old = store.get_resource("document", "res-1", r1).await.unwrap().unwrap();
        assert_eq!(old.reporter["owner_id"], "user-1");
        let new = store.get_resource("document", "res-1", r2).await.unwrap().unwrap();
        assert_eq!(new.reporter["owner_id"], "user-2");
    }

    #[tokio::test]
    async fn test_find_resource_by_canonical_id() {
        let store = MemoryBackend::new();
        let rev = store
            .write(WriteBatch::new().upsert_resource(record("res-1", "doc-123", "user-1")))
            .await
            .unwrap();

        let found = store.find_resource("res-1", rev).await.unwrap().unwrap();
        assert_eq!(found.resource_type, "document");
        assert_eq!(found.local_resource_id, "doc-123");
        assert!(store.find_resource("res-9", rev).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resource_soft_delete_keeps_identity() {
        let store = MemoryBackend::new();
        store
            .write(WriteBatch::new().upsert_resource(record("res-1", "doc-123", "user-1")))
            .await
            .unwrap();
        let r2 = store
            .write(
                WriteBatch::new().tombstone_resource(ObjectRef::new("document", "res-1")),
            )
            .await
            .unwrap();

        assert!(store.get_resource("document", "res-1", r2).await.unwrap().is_none());
        // The identity row survives so a re-report resurrects the id.
        assert_eq!(
            store.resolve_canonical("drive", "doc-123").await.unwrap(),
            Some("res-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_identity_claim_conflict() {
        let store = MemoryBackend::new();
        store
            .write(WriteBatch::new().upsert_resource(record("res-1", "doc-123", "user-1")))
            .await
            .unwrap();

        let err = store
            .write(WriteBatch::new().upsert_resource(record("res-2", "doc-123", "user-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict { .. }));
        // The losing batch must not have applied anything.
        assert_eq!(
            store.resolve_canonical("drive", "doc-123").await.unwrap(),
            Some("res-1".to_string())
        );
        assert_eq!(store.head_revision().await.unwrap(), Revision(1));
    }

    #[tokio::test]
    async fn test_list_resources_sorted_and_live_only() {
        let store = MemoryBackend::new();
        store
            .write(
                WriteBatch::new()
                    .upsert_resource(record("res-b", "doc-b", "user-1"))
                    .upsert_resource(record("res-a", "doc-a", "user-1")),
            )
            .await
            .unwrap();
        let rev = store
            .write(
                WriteBatch::new().tombstone_resource(ObjectRef::new("document", "res-b")),
            )
            .await
            .unwrap();

        let records = store.list_resources("document", rev).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resource_id, "res-a");
    }

    #[tokio::test]
    async fn test_concurrent_writers_get_unique_revisions() {
        let store = Arc::new(MemoryBackend::new());
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..10 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .write(WriteBatch::new().insert_tuple(tuple(
                        &format!("doc-{i}"),
                        "viewer",
                        "sarah",
                    )))
                    .await
                    .unwrap()
            });
        }

        let mut revisions = Vec::new();
        while let Some(result) = tasks.join_next().await {
            revisions.push(result.unwrap());
        }

        revisions.sort();
        let before = revisions.len();
        revisions.dedup();
        assert_eq!(revisions.len(), before);
        assert_eq!(store.head_revision().await.unwrap(), Revision(10));
    }
}

//! Report and delete flows.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use muster_core::{SchemaRegistry, SchemaSnapshot};
use muster_store::MusterStore;
use muster_types::{
    RelationTuple, ReportOutcome, ReportRequest, ResourceRecord, Revision, StoreError, WriteBatch,
};

use crate::projection::ProjectionTable;
use crate::registry::ReporterRegistry;
use crate::{IngestError, Result};

/// Identity-claim retry budget per report.
const MAX_IDENTITY_RETRIES: usize = 3;

/// The ingestion service.
///
/// Validates reports against the reporter registry and the active schema,
/// resolves canonical identity, and commits the record plus its projected
/// tuple changes as one atomic batch.
pub struct Ingestor {
    store: Arc<dyn MusterStore>,
    registry: Arc<SchemaRegistry>,
    reporters: ReporterRegistry,
    projections: ProjectionTable,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MusterStore>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            registry,
            reporters: ReporterRegistry::new(),
            projections: ProjectionTable::new(),
        }
    }

    pub fn with_reporters(mut self, reporters: ReporterRegistry) -> Self {
        self.reporters = reporters;
        self
    }

    pub fn with_projections(mut self, projections: ProjectionTable) -> Self {
        self.projections = projections;
        self
    }

    /// Ingest one resource report.
    ///
    /// Resolves or mints the canonical id for the reporter-local identity,
    /// then writes the record upsert together with the projected-tuple
    /// diff in one batch. Losing an identity race to a concurrent first
    /// report retries with the winner's id, so re-reporting is idempotent
    /// on identity.
    ///
    /// # Errors
    /// Returns `Validation` for malformed requests or projections
    /// targeting relations the schema does not define,
    /// `UnknownReporterType` / `UnknownResourceType` for requests outside
    /// the configured surface, and `Store` for backend failures.
    #[instrument(skip(self, request), fields(
        reporter_type = %request.reporter_type,
        resource_type = %request.resource_type,
        local_resource_id = %request.local_resource_id,
    ))]
    pub async fn report(&self, request: ReportRequest) -> Result<ReportOutcome> {
        debug!("Ingesting resource report");

        validate_report(&request)?;
        self.reporters.authorize(&request.reporter_type, &request.resource_type)?;

        let snapshot = self.registry.snapshot();
        if !snapshot.has_type(&request.resource_type) {
            return Err(IngestError::UnknownResourceType {
                reporter_type: request.reporter_type.clone(),
                resource_type: request.resource_type.clone(),
            });
        }
        self.validate_projections(&snapshot, &request.resource_type)?;

        let mut attempt = 0;
        loop {
            let resource_id = match self
                .store
                .resolve_canonical(&request.reporter_type, &request.local_resource_id)
                .await?
            {
                Some(existing) => existing,
                None => Uuid::new_v4().to_string(),
            };

            let record = build_record(&request, resource_id.clone());
            let new_tuples = self.projections.project(&record);

            let head = self.store.head_revision().await?;
            let old_tuples = match self
                .store
                .get_resource(&record.resource_type, &record.resource_id, head)
                .await?
            {
                Some(previous) => self.projections.project(&previous),
                None => Vec::new(),
            };

            match self.store.write(diff_batch(record, &old_tuples, &new_tuples)).await {
                Ok(revision) => {
                    metrics::counter!("muster_reports_total").increment(1);
                    debug!(%resource_id, %revision, "Resource report committed");
                    return Ok(ReportOutcome { resource_id, revision });
                },
                Err(StoreError::IdentityConflict { .. }) if attempt < MAX_IDENTITY_RETRIES => {
                    attempt += 1;
                    debug!(attempt, "Identity claim lost a race, re-resolving");
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Soft-delete the resource a reporter previously reported.
    ///
    /// Tombstones the record and clears every tuple on the canonical
    /// object in one batch. Unknown or already-deleted resources are a
    /// no-op (`None`), so retries are safe. The identity row survives:
    /// re-reporting resurrects the same canonical id.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        reporter_type: &str,
        local_resource_id: &str,
    ) -> Result<Option<Revision>> {
        debug!("Deleting reported resource");

        if reporter_type.is_empty() || local_resource_id.is_empty() {
            return Err(IngestError::Validation(
                "reporter type and local resource id must be non-empty".to_string(),
            ));
        }

        let Some(resource_id) =
            self.store.resolve_canonical(reporter_type, local_resource_id).await?
        else {
            return Ok(None);
        };

        let head = self.store.head_revision().await?;
        let Some(record) = self.store.find_resource(&resource_id, head).await? else {
            return Ok(None);
        };

        let object = record.object_ref();
        let batch = WriteBatch::new().tombstone_resource(object.clone()).clear_object(object);
        let revision = self.store.write(batch).await?;

        metrics::counter!("muster_deletes_total").increment(1);
        debug!(%resource_id, %revision, "Resource soft-deleted");
        Ok(Some(revision))
    }

    /// Every rule for this resource type must target a relation the
    /// schema defines, so projected tuples are always resolvable.
    fn validate_projections(&self, snapshot: &SchemaSnapshot, resource_type: &str) -> Result<()> {
        for projection in self.projections.for_resource_type(resource_type) {
            if !snapshot.has_relation(resource_type, &projection.relation) {
                return Err(IngestError::Validation(format!(
                    "projection for attribute {} targets unknown relation {} on {}",
                    projection.attribute, projection.relation, resource_type
                )));
            }
        }
        Ok(())
    }
}

fn validate_report(request: &ReportRequest) -> Result<()> {
    if request.reporter_type.is_empty() {
        return Err(IngestError::Validation("reporter_type must be non-empty".to_string()));
    }
    if request.reporter_instance_id.is_empty() {
        return Err(IngestError::Validation(
            "reporter_instance_id must be non-empty".to_string(),
        ));
    }
    if request.resource_type.is_empty() {
        return Err(IngestError::Validation("resource_type must be non-empty".to_string()));
    }
    if request.local_resource_id.is_empty() {
        return Err(IngestError::Validation("local_resource_id must be non-empty".to_string()));
    }
    Ok(())
}

fn build_record(request: &ReportRequest, resource_id: String) -> ResourceRecord {
    ResourceRecord {
        resource_type: request.resource_type.clone(),
        resource_id,
        reporter_type: request.reporter_type.clone(),
        reporter_instance_id: request.reporter_instance_id.clone(),
        local_resource_id: request.local_resource_id.clone(),
        common: request.common.clone(),
        reporter: request.reporter.clone(),
        metadata: request.metadata.clone(),
        reported_at: Utc::now(),
    }
}

/// The record upsert plus the projected-tuple diff, as one batch.
fn diff_batch(
    record: ResourceRecord,
    old_tuples: &[RelationTuple],
    new_tuples: &[RelationTuple],
) -> WriteBatch {
    let mut batch = WriteBatch::new().upsert_resource(record);
    for tuple in old_tuples {
        if !new_tuples.contains(tuple) {
            batch = batch.delete_tuple(tuple.clone());
        }
    }
    for tuple in new_tuples {
        if !old_tuples.contains(tuple) {
            batch = batch.insert_tuple(tuple.clone());
        }
    }
    batch
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use muster_store::{MemoryBackend, ResourceStore, TupleStore};
    use muster_types::{AttributeMap, ObjectRef, SubjectRef};
    use serde_json::{Value, json};

    use crate::projection::Projection;

    use super::*;

    const SCHEMA: &str = "
        type principal { }

        type document {
            relation owner
            relation viewer: this | owner
        }
    ";

    fn document_projections() -> ProjectionTable {
        ProjectionTable::new()
            .with_projection(Projection::new("document", "owner_id", "owner", "principal"))
            .with_projection(Projection::new("document", "shared_with", "viewer", "principal"))
    }

    fn setup() -> (Arc<MemoryBackend>, Ingestor) {
        let store = Arc::new(MemoryBackend::new());
        let registry = Arc::new(SchemaRegistry::with_schema(SCHEMA).unwrap());
        let ingestor =
            Ingestor::new(store.clone(), registry).with_projections(document_projections());
        (store, ingestor)
    }

    fn attrs(entries: &[(&str, Value)]) -> AttributeMap {
        entries.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn report(local_id: &str, owner: &str) -> ReportRequest {
        ReportRequest::builder()
            .reporter_type("drive")
            .reporter_instance_id("drive-1")
            .resource_type("document")
            .local_resource_id(local_id)
            .reporter(attrs(&[("owner_id", json!(owner))]))
            .build()
    }

    async fn owner_subjects(store: &MemoryBackend, resource_id: &str) -> Vec<SubjectRef> {
        let head = store.head_revision().await.unwrap();
        store
            .read(&ObjectRef::new("document", resource_id), "owner", head)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.subject)
            .collect()
    }

    #[tokio::test]
    async fn test_report_mints_canonical_id_and_projects_owner() {
        let (store, ingestor) = setup();

        let outcome = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        assert!(Uuid::parse_str(&outcome.resource_id).is_ok());
        assert_eq!(outcome.revision, Revision(1));

        assert_eq!(
            owner_subjects(&store, &outcome.resource_id).await,
            vec![SubjectRef::new("principal", "sarah")]
        );
    }

    #[tokio::test]
    async fn test_re_report_reuses_canonical_id() {
        let (store, ingestor) = setup();

        let first = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        let second = ingestor.report(report("doc-123", "sarah")).await.unwrap();

        assert_eq!(first.resource_id, second.resource_id);
        assert!(second.revision > first.revision);

        let head = store.head_revision().await.unwrap();
        let record = store
            .get_resource("document", &first.resource_id, head)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.local_resource_id, "doc-123");
    }

    #[tokio::test]
    async fn test_re_report_replaces_projected_tuples() {
        let (store, ingestor) = setup();

        let outcome = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        ingestor.report(report("doc-123", "alex")).await.unwrap();

        assert_eq!(
            owner_subjects(&store, &outcome.resource_id).await,
            vec![SubjectRef::new("principal", "alex")]
        );
    }

    #[tokio::test]
    async fn test_re_report_unchanged_keeps_single_tuple() {
        let (store, ingestor) = setup();

        let outcome = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        ingestor.report(report("doc-123", "sarah")).await.unwrap();

        assert_eq!(owner_subjects(&store, &outcome.resource_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_array_attribute_projects_every_member() {
        let (store, ingestor) = setup();

        let request = ReportRequest::builder()
            .reporter_type("drive")
            .reporter_instance_id("drive-1")
            .resource_type("document")
            .local_resource_id("doc-123")
            .reporter(attrs(&[("shared_with", json!(["zoe", "alex"]))]))
            .build();
        let outcome = ingestor.report(request).await.unwrap();

        let head = store.head_revision().await.unwrap();
        let viewers = store
            .read(&ObjectRef::new("document", &outcome.resource_id), "viewer", head)
            .await
            .unwrap();
        assert_eq!(viewers.len(), 2);
    }

    #[tokio::test]
    async fn test_report_rejects_empty_fields() {
        let (_store, ingestor) = setup();

        let request = ReportRequest::builder()
            .reporter_type("drive")
            .reporter_instance_id("drive-1")
            .resource_type("document")
            .local_resource_id("")
            .build();

        let err = ingestor.report(request).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_report_rejects_resource_type_missing_from_schema() {
        let (_store, ingestor) = setup();

        let request = ReportRequest::builder()
            .reporter_type("satellite")
            .reporter_instance_id("sat-1")
            .resource_type("host")
            .local_resource_id("host-9")
            .build();

        let err = ingestor.report(request).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownResourceType { .. }));
    }

    #[tokio::test]
    async fn test_closed_registry_is_enforced() {
        let store = Arc::new(MemoryBackend::new());
        let registry = Arc::new(SchemaRegistry::with_schema(SCHEMA).unwrap());
        let ingestor = Ingestor::new(store, registry)
            .with_reporters(
                ReporterRegistry::new()
                    .with_reporter("drive", Some(vec!["document".to_string()])),
            )
            .with_projections(document_projections());

        assert!(ingestor.report(report("doc-123", "sarah")).await.is_ok());

        let foreign = ReportRequest::builder()
            .reporter_type("satellite")
            .reporter_instance_id("sat-1")
            .resource_type("document")
            .local_resource_id("host-9")
            .build();
        let err = ingestor.report(foreign).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownReporterType(_)));
    }

    #[tokio::test]
    async fn test_projection_to_unknown_relation_rejected() {
        let store = Arc::new(MemoryBackend::new());
        let registry = Arc::new(SchemaRegistry::with_schema(SCHEMA).unwrap());
        let ingestor = Ingestor::new(store, registry).with_projections(
            ProjectionTable::new()
                .with_projection(Projection::new("document", "group_id", "steward", "group")),
        );

        let err = ingestor.report(report("doc-123", "sarah")).await.unwrap_err();
        match err {
            IngestError::Validation(message) => assert!(message.contains("steward")),
            other => unreachable!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_tombstones_and_clears_tuples() {
        let (store, ingestor) = setup();

        let outcome = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        let deleted_at = ingestor.delete("drive", "doc-123").await.unwrap();
        assert!(deleted_at.is_some());

        let head = store.head_revision().await.unwrap();
        assert!(
            store.get_resource("document", &outcome.resource_id, head).await.unwrap().is_none()
        );
        assert!(owner_subjects(&store, &outcome.resource_id).await.is_empty());

        // Repeated deletes are a no-op, not an error.
        assert_eq!(ingestor.delete("drive", "doc-123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_unknown_resource_is_noop() {
        let (_store, ingestor) = setup();
        assert_eq!(ingestor.delete("drive", "never-reported").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_re_report_after_delete_resurrects_canonical_id() {
        let (store, ingestor) = setup();

        let first = ingestor.report(report("doc-123", "sarah")).await.unwrap();
        ingestor.delete("drive", "doc-123").await.unwrap();
        let second = ingestor.report(report("doc-123", "sarah")).await.unwrap();

        assert_eq!(first.resource_id, second.resource_id);
        assert_eq!(
            owner_subjects(&store, &second.resource_id).await,
            vec![SubjectRef::new("principal", "sarah")]
        );
    }
}

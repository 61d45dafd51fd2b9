//! Report-to-check integration tests
//!
//! Full pipeline: a reporter submits a resource, attribute projections
//! materialize relation tuples, and checks resolve against them using
//! tokens minted from the report revisions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use muster_core::{Resolver, SchemaRegistry};
use muster_ingest::{Ingestor, Projection, ProjectionTable};
use muster_store::MemoryBackend;
use muster_types::{
    AttributeMap, CheckRequest, ConsistencyMode, Decision, ObjectRef, ReportRequest, Revision,
    SubjectRef,
};
use serde_json::{Value, json};

const SCHEMA: &str = "
    type principal { }

    type document {
        relation owner
        relation viewer: this | owner
    }
";

struct Pipeline {
    ingestor: Ingestor,
    resolver: Resolver,
}

fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryBackend::new());
    let registry = Arc::new(SchemaRegistry::with_schema(SCHEMA).unwrap());

    let projections = ProjectionTable::new()
        .with_projection(Projection::new("document", "owner_id", "owner", "principal"))
        .with_projection(Projection::new("document", "shared_with", "viewer", "principal"));

    Pipeline {
        ingestor: Ingestor::new(store.clone(), registry.clone()).with_projections(projections),
        resolver: Resolver::new(store, registry),
    }
}

fn attrs(entries: &[(&str, Value)]) -> AttributeMap {
    entries.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

fn report(local_id: &str, attributes: AttributeMap) -> ReportRequest {
    ReportRequest::builder()
        .reporter_type("drive")
        .reporter_instance_id("drive-1")
        .resource_type("document")
        .local_resource_id(local_id)
        .reporter(attributes)
        .build()
}

impl Pipeline {
    /// Check `principal` for `viewer` on the canonical resource, at least
    /// as fresh as `revision`.
    async fn viewer_decision(
        &self,
        resource_id: &str,
        principal: &str,
        revision: Revision,
    ) -> Decision {
        let token = self.resolver.tokens().issue(revision);
        let request = CheckRequest::builder()
            .object(ObjectRef::new("document", resource_id))
            .relation("viewer")
            .subject(SubjectRef::new("principal", principal))
            .token(token.into_string())
            .mode(ConsistencyMode::AtLeastAsFresh)
            .build();

        self.resolver.check(request).await.unwrap().decision
    }
}

#[tokio::test]
async fn test_owner_projection_grants_viewer_through_union() {
    let p = pipeline();

    let outcome = p
        .ingestor
        .report(report("doc-123", attrs(&[("owner_id", json!("sarah"))])))
        .await
        .unwrap();

    // Ownership flows into viewer through the rewrite union.
    let decision = p.viewer_decision(&outcome.resource_id, "sarah", outcome.revision).await;
    assert_eq!(decision, Decision::Allow);

    let decision = p.viewer_decision(&outcome.resource_id, "alex", outcome.revision).await;
    assert_eq!(decision, Decision::Deny);
}

#[tokio::test]
async fn test_direct_share_and_owner_are_both_viewers() {
    let p = pipeline();

    let outcome = p
        .ingestor
        .report(report(
            "doc-123",
            attrs(&[("owner_id", json!("sarah")), ("shared_with", json!(["zoe"]))]),
        ))
        .await
        .unwrap();

    for principal in ["sarah", "zoe"] {
        let decision = p.viewer_decision(&outcome.resource_id, principal, outcome.revision).await;
        assert_eq!(decision, Decision::Allow, "{principal} should be a viewer");
    }
}

#[tokio::test]
async fn test_ownership_change_moves_access() {
    let p = pipeline();

    let first = p
        .ingestor
        .report(report("doc-123", attrs(&[("owner_id", json!("sarah"))])))
        .await
        .unwrap();
    let second = p
        .ingestor
        .report(report("doc-123", attrs(&[("owner_id", json!("alex"))])))
        .await
        .unwrap();
    assert_eq!(first.resource_id, second.resource_id);

    // Checked at the second report's revision: only the new owner remains.
    let decision = p.viewer_decision(&second.resource_id, "alex", second.revision).await;
    assert_eq!(decision, Decision::Allow);
    let decision = p.viewer_decision(&second.resource_id, "sarah", second.revision).await;
    assert_eq!(decision, Decision::Deny);
}

#[tokio::test]
async fn test_delete_revokes_and_re_report_restores() {
    let p = pipeline();

    let first = p
        .ingestor
        .report(report("doc-123", attrs(&[("owner_id", json!("sarah"))])))
        .await
        .unwrap();

    let deleted_at = p.ingestor.delete("drive", "doc-123").await.unwrap().unwrap();
    let decision = p.viewer_decision(&first.resource_id, "sarah", deleted_at).await;
    assert_eq!(decision, Decision::Deny);

    let restored = p
        .ingestor
        .report(report("doc-123", attrs(&[("owner_id", json!("sarah"))])))
        .await
        .unwrap();
    assert_eq!(restored.resource_id, first.resource_id);

    let decision = p.viewer_decision(&restored.resource_id, "sarah", restored.revision).await;
    assert_eq!(decision, Decision::Allow);
}

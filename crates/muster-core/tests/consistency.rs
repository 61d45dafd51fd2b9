//! Consistency token integration tests
//!
//! End-to-end flows for token issuance and the visibility guarantees
//! tokens carry across writes, checks, and expansions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use tokio::task::JoinSet;

use muster_cache::CheckCache;
use muster_core::{ResolveError, Resolver, SchemaRegistry};
use muster_store::{MemoryBackend, TupleStore};
use muster_types::{
    CheckRequest, ConsistencyMode, Decision, ExpandRequest, ObjectRef, Revision, StoreError,
    SubjectRef, WriteBatch,
};

mod common;
use common::{TestFixture, grant};

const SCHEMA: &str = "
    type principal { }

    type document {
        relation owner
        relation viewer: this | owner
    }
";

fn viewer_check(principal: &str, token: Option<String>, mode: ConsistencyMode) -> CheckRequest {
    CheckRequest::builder()
        .object(ObjectRef::new("document", "plan"))
        .relation("viewer")
        .subject(SubjectRef::new("principal", principal))
        .maybe_token(token)
        .mode(mode)
        .build()
}

//
// Token Issuance Tests
//

#[tokio::test]
async fn test_check_outcome_carries_head_revision() {
    let fixture = TestFixture::new(SCHEMA);

    fixture.write(WriteBatch::new().insert_tuple(grant("document", "plan", "viewer", "zoe"))).await;
    let head = fixture
        .write(WriteBatch::new().insert_tuple(grant("document", "plan", "owner", "sarah")))
        .await;

    let outcome = fixture
        .resolver
        .check(viewer_check("zoe", None, ConsistencyMode::MinimizeLatency))
        .await
        .unwrap();

    assert_eq!(outcome.decision, Decision::Allow);
    assert_eq!(outcome.revision, head);
}

#[tokio::test]
async fn test_token_roundtrips_between_check_and_expand() {
    let fixture = TestFixture::new(SCHEMA);

    fixture.write(WriteBatch::new().insert_tuple(grant("document", "plan", "owner", "sarah"))).await;

    let outcome = fixture
        .resolver
        .check(viewer_check("sarah", None, ConsistencyMode::MinimizeLatency))
        .await
        .unwrap();
    let token = fixture.resolver.tokens().issue(outcome.revision);

    let expanded = fixture
        .resolver
        .expand(
            ExpandRequest::builder()
                .object(ObjectRef::new("document", "plan"))
                .relation("viewer")
                .token(token.into_string())
                .mode(ConsistencyMode::AtLeastAsFresh)
                .build(),
        )
        .await
        .unwrap();

    assert!(expanded.revision >= outcome.revision);
    assert_eq!(expanded.subjects, vec![SubjectRef::new("principal", "sarah")]);
}

//
// New-Enemy Prevention Tests
//

#[tokio::test]
async fn test_revocation_visible_through_fresh_token() {
    let store = Arc::new(MemoryBackend::new());
    let registry = Arc::new(SchemaRegistry::with_schema(SCHEMA).unwrap());
    let cache = Arc::new(CheckCache::default());
    let resolver = Resolver::new(store.clone(), registry).with_cache(cache.clone());

    store
        .write(WriteBatch::new().insert_tuple(grant("document", "plan", "viewer", "mallory")))
        .await
        .unwrap();

    // Warm the cache while the grant is live.
    let before = resolver
        .check(viewer_check("mallory", None, ConsistencyMode::MinimizeLatency))
        .await
        .unwrap();
    assert_eq!(before.decision, Decision::Allow);

    let revoked_at = store
        .write(WriteBatch::new().delete_tuple(grant("document", "plan", "viewer", "mallory")))
        .await
        .unwrap();
    let token = resolver.tokens().issue(revoked_at);

    let after = resolver
        .check(viewer_check(
            "mallory",
            Some(token.into_string()),
            ConsistencyMode::AtLeastAsFresh,
        ))
        .await
        .unwrap();

    assert_eq!(after.decision, Decision::Deny);
    assert_eq!(after.revision, revoked_at);
}

#[tokio::test]
async fn test_token_is_a_floor_not_a_pin() {
    let fixture = TestFixture::new(SCHEMA);

    let granted_at = fixture
        .write(WriteBatch::new().insert_tuple(grant("document", "plan", "viewer", "mallory")))
        .await;
    let stale_token = fixture.resolver.tokens().issue(granted_at);

    fixture
        .write(WriteBatch::new().delete_tuple(grant("document", "plan", "viewer", "mallory")))
        .await;

    // An old token never licenses reading around a later revocation.
    let outcome = fixture
        .resolver
        .check(viewer_check(
            "mallory",
            Some(stale_token.into_string()),
            ConsistencyMode::AtLeastAsFresh,
        ))
        .await
        .unwrap();

    assert_eq!(outcome.decision, Decision::Deny);
}

#[tokio::test]
async fn test_token_ahead_of_head_is_unavailable() {
    let fixture = TestFixture::new(SCHEMA);

    let head = fixture
        .write(WriteBatch::new().insert_tuple(grant("document", "plan", "viewer", "zoe")))
        .await;
    let future_token = fixture.resolver.tokens().issue(Revision(head.0 + 5));

    let err = fixture
        .resolver
        .check(viewer_check(
            "zoe",
            Some(future_token.into_string()),
            ConsistencyMode::AtLeastAsFresh,
        ))
        .await
        .unwrap_err();

    match err {
        ResolveError::Store(StoreError::RevisionNotAvailable { requested, latest }) => {
            assert_eq!(requested, Revision(head.0 + 5));
            assert_eq!(latest, head);
        },
        other => unreachable!("expected RevisionNotAvailable, got {other:?}"),
    }
}

//
// Concurrent Operations Tests
//

#[tokio::test]
async fn test_concurrent_writes_mint_unique_revisions() {
    let store = Arc::new(MemoryBackend::new());

    let mut set = JoinSet::new();
    for i in 0..10 {
        let store = store.clone();
        set.spawn(async move {
            store
                .write(WriteBatch::new().insert_tuple(grant(
                    "document",
                    &format!("doc{i}"),
                    "viewer",
                    &format!("user{i}"),
                )))
                .await
        });
    }

    let mut revisions = Vec::new();
    while let Some(result) = set.join_next().await {
        revisions.push(result.expect("task panicked").expect("write failed"));
    }

    revisions.sort();
    revisions.dedup();
    assert_eq!(revisions.len(), 10, "every write should mint its own revision");
}

#[tokio::test]
async fn test_read_your_own_writes() {
    let fixture = TestFixture::new(SCHEMA);

    let mut set = JoinSet::new();
    for i in 0..10 {
        let store = fixture.store.clone();
        let resolver = fixture.resolver.clone();
        set.spawn(async move {
            store
                .write(WriteBatch::new().insert_tuple(grant(
                    "document",
                    &format!("doc{i}"),
                    "viewer",
                    &format!("user{i}"),
                )))
                .await
                .expect("write failed");

            let request = CheckRequest::builder()
                .object(ObjectRef::new("document", format!("doc{i}")))
                .relation("viewer")
                .subject(SubjectRef::new("principal", format!("user{i}")))
                .build();
            resolver.check(request).await
        });
    }

    while let Some(result) = set.join_next().await {
        let outcome = result.expect("task panicked").expect("check failed");
        assert_eq!(outcome.decision, Decision::Allow, "task should see its own write");
    }
}

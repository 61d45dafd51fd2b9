//! Helper utilities for integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use muster_core::{Resolver, SchemaRegistry};
use muster_store::{MemoryBackend, TupleStore};
use muster_types::{
    CheckRequest, Decision, ObjectRef, RelationTuple, Revision, SubjectRef, WriteBatch,
};

/// Test fixture wiring a store, a published schema, and a resolver
pub struct TestFixture {
    pub store: Arc<MemoryBackend>,
    pub registry: Arc<SchemaRegistry>,
    pub resolver: Resolver,
}

impl TestFixture {
    /// Create a fixture with the given schema source published as version 1
    pub fn new(source: &str) -> Self {
        let store = Arc::new(MemoryBackend::new());
        let registry = Arc::new(SchemaRegistry::with_schema(source).expect("schema should publish"));
        let resolver = Resolver::new(store.clone(), registry.clone());

        Self { store, registry, resolver }
    }

    /// Write a batch and return the revision it committed at
    pub async fn write(&self, batch: WriteBatch) -> Revision {
        self.store.write(batch).await.expect("write should succeed")
    }

    /// Check a principal against `(object:id, relation)` at head
    pub async fn check(&self, object: &str, id: &str, relation: &str, principal: &str) -> Decision {
        let request = CheckRequest::builder()
            .object(ObjectRef::new(object, id))
            .relation(relation)
            .subject(SubjectRef::new("principal", principal))
            .build();

        self.resolver.check(request).await.expect("check should succeed").decision
    }

    /// Assert that a check returns Allow
    pub async fn assert_allowed(&self, object: &str, id: &str, relation: &str, principal: &str) {
        let decision = self.check(object, id, relation, principal).await;
        assert_eq!(
            decision,
            Decision::Allow,
            "principal:{principal} should be allowed {relation} on {object}:{id}"
        );
    }

    /// Assert that a check returns Deny
    pub async fn assert_denied(&self, object: &str, id: &str, relation: &str, principal: &str) {
        let decision = self.check(object, id, relation, principal).await;
        assert_eq!(
            decision,
            Decision::Deny,
            "principal:{principal} should be denied {relation} on {object}:{id}"
        );
    }
}

/// Tuple granting a relation to a principal
pub fn grant(object: &str, id: &str, relation: &str, principal: &str) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(object, id),
        relation,
        SubjectRef::new("principal", principal),
    )
}

/// Tuple linking an object to another object, for tupleset walks
pub fn link(
    object: &str,
    id: &str,
    relation: &str,
    target_type: &str,
    target_id: &str,
) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(object, id),
        relation,
        SubjectRef::new(target_type, target_id),
    )
}

/// Tuple whose subject is a userset reference
pub fn member_of(
    object: &str,
    id: &str,
    relation: &str,
    group_type: &str,
    group_id: &str,
    group_relation: &str,
) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(object, id),
        relation,
        SubjectRef::userset(group_type, group_id, group_relation),
    )
}

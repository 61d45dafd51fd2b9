//! Attribute-to-relation projections.
//!
//! A projection rule turns a reported attribute into relation tuples on
//! the canonical resource: `owner_id: "sarah"` with a rule
//! `{ document, owner_id, owner, principal }` yields
//! `document:<id>#owner@principal:sarah`.

use std::collections::BTreeSet;

use serde_json::Value;

use muster_types::{RelationTuple, ResourceRecord, SubjectRef};

/// One attribute-to-relation projection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub resource_type: String,
    pub attribute: String,
    pub relation: String,
    pub subject_type: String,
}

impl Projection {
    pub fn new(
        resource_type: impl Into<String>,
        attribute: impl Into<String>,
        relation: impl Into<String>,
        subject_type: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            attribute: attribute.into(),
            relation: relation.into(),
            subject_type: subject_type.into(),
        }
    }
}

/// The configured projection rules, applied per resource type.
#[derive(Debug, Clone, Default)]
pub struct ProjectionTable {
    projections: Vec<Projection>,
}

impl ProjectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    /// The rules applying to a resource type.
    pub fn for_resource_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a Projection> {
        self.projections.iter().filter(move |p| p.resource_type == resource_type)
    }

    /// Derive the relation tuples a record's attributes project to.
    ///
    /// Reporter-specific attributes shadow common ones under the same
    /// key. A string value yields one tuple, an array one per string
    /// element; other value shapes contribute nothing. Output is
    /// deduplicated and sorted.
    pub fn project(&self, record: &ResourceRecord) -> Vec<RelationTuple> {
        let object = record.object_ref();
        let mut tuples = BTreeSet::new();

        for projection in self.for_resource_type(&record.resource_type) {
            let value = record
                .reporter
                .get(&projection.attribute)
                .or_else(|| record.common.get(&projection.attribute));
            let Some(value) = value else { continue };

            for subject_id in subject_ids(value) {
                tuples.insert(RelationTuple::new(
                    object.clone(),
                    projection.relation.clone(),
                    SubjectRef::new(projection.subject_type.clone(), subject_id),
                ));
            }
        }

        tuples.into_iter().collect()
    }
}

/// The subject ids a projected value contributes. Empty strings never
/// form a valid tuple and are dropped here.
fn subject_ids(value: &Value) -> Vec<String> {
    let candidates = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            items.iter().filter_map(|item| item.as_str().map(str::to_string)).collect()
        },
        _ => Vec::new(),
    };
    candidates.into_iter().filter(|id| !id.is_empty()).collect()
}

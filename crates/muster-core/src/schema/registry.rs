//! Versioned schema registry with atomic snapshot publication.
//!
//! Publishing parses and validates the source, then swaps in a new
//! immutable snapshot under a single version number. Readers clone an
//! `Arc` and never observe a half-applied schema.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::ast::{RewriteExpr, Schema, TypeDef};
use super::parser::parse_schema;
use crate::ResolveError;

/// Relations without an expression hold direct tuples.
static DIRECT: RewriteExpr = RewriteExpr::This;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Duplicate type definition: {0}")]
    DuplicateType(String),

    #[error("Duplicate relation {relation} on type {object_type}")]
    DuplicateRelation {
        object_type: String,
        relation: String,
    },

    #[error("Relation name {relation} on type {object_type} is reserved")]
    ReservedName {
        object_type: String,
        relation: String,
    },

    #[error("Relation {relation} on type {object_type} references unknown relation {target}")]
    UnknownReference {
        object_type: String,
        relation: String,
        target: String,
    },

    #[error("Cyclic relation reference on type {object_type}: {}", .chain.join(" -> "))]
    CyclicRelation {
        object_type: String,
        chain: Vec<String>,
    },
}

/// An immutable published schema at a specific version.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub source: String,
    pub schema: Schema,
}

impl SchemaSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            source: String::new(),
            schema: Schema::new(Vec::new()),
        }
    }

    /// Resolve the rewrite expression for a relation. A relation
    /// defined without an expression behaves as `this`.
    pub fn resolve(&self, object_type: &str, relation: &str) -> crate::Result<&RewriteExpr> {
        let type_def = self
            .schema
            .find_type(object_type)
            .ok_or_else(|| ResolveError::UnknownObjectType(object_type.to_string()))?;

        let relation_def = type_def.find_relation(relation).ok_or_else(|| {
            ResolveError::UnknownRelation {
                object_type: object_type.to_string(),
                relation: relation.to_string(),
            }
        })?;

        Ok(relation_def.expr.as_ref().unwrap_or(&DIRECT))
    }

    pub fn has_type(&self, object_type: &str) -> bool {
        self.schema.find_type(object_type).is_some()
    }

    pub fn has_relation(&self, object_type: &str, relation: &str) -> bool {
        self.schema
            .find_type(object_type)
            .and_then(|t| t.find_relation(relation))
            .is_some()
    }
}

/// Registry holding the active schema snapshot.
///
/// Versions are dense and strictly increasing, starting at 1 for the
/// first publish. Version 0 is the built-in empty schema.
pub struct SchemaRegistry {
    active: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(SchemaSnapshot::empty())),
        }
    }

    /// Create a registry with an initial schema already published.
    pub fn with_schema(source: &str) -> Result<Self, SchemaError> {
        let registry = Self::new();
        registry.publish(source)?;
        Ok(registry)
    }

    /// Parse, validate, and atomically activate a new schema. Returns
    /// the version assigned to it. On error the active snapshot is
    /// left untouched.
    pub fn publish(&self, source: &str) -> Result<u64, SchemaError> {
        let schema = parse_schema(source)?;
        validate(&schema)?;

        let mut active = self.active.write();
        let version = active.version + 1;
        *active = Arc::new(SchemaSnapshot {
            version,
            source: source.to_string(),
            schema,
        });
        Ok(version)
    }

    /// The currently active snapshot.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.active.read().clone()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(schema: &Schema) -> Result<(), SchemaError> {
    let mut seen_types = HashSet::new();

    for type_def in &schema.types {
        if !seen_types.insert(type_def.name.as_str()) {
            return Err(SchemaError::DuplicateType(type_def.name.clone()));
        }

        let mut seen_relations = HashSet::new();
        for relation in &type_def.relations {
            if relation.name == "this" {
                return Err(SchemaError::ReservedName {
                    object_type: type_def.name.clone(),
                    relation: relation.name.clone(),
                });
            }
            if !seen_relations.insert(relation.name.as_str()) {
                return Err(SchemaError::DuplicateRelation {
                    object_type: type_def.name.clone(),
                    relation: relation.name.clone(),
                });
            }
        }

        for relation in &type_def.relations {
            let Some(expr) = &relation.expr else { continue };

            let mut refs = Vec::new();
            expr.same_object_refs(&mut refs);
            for target in refs {
                if type_def.find_relation(target).is_none() {
                    return Err(SchemaError::UnknownReference {
                        object_type: type_def.name.clone(),
                        relation: relation.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        for relation in &type_def.relations {
            let mut visited = HashSet::new();
            let mut path = vec![relation.name.clone()];
            if let Some(chain) = detect_cycle(type_def, &relation.name, &mut visited, &mut path) {
                return Err(SchemaError::CyclicRelation {
                    object_type: type_def.name.clone(),
                    chain,
                });
            }
        }
    }

    Ok(())
}

/// Walk same-object references looking for a path back into `path`.
/// The far side of a tupleset walk crosses to another object and is
/// bounded at check time instead.
fn detect_cycle(
    type_def: &TypeDef,
    relation: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    let expr = type_def.find_relation(relation).and_then(|r| r.expr.as_ref())?;

    let mut refs = Vec::new();
    expr.same_object_refs(&mut refs);

    for target in refs {
        if path.iter().any(|p| p == target) {
            let start = path.iter().position(|p| p == target).unwrap_or(0);
            let mut chain = path[start..].to_vec();
            chain.push(target.to_string());
            return Some(chain);
        }

        if visited.contains(target) {
            // Already explored without finding a cycle
            continue;
        }
        visited.insert(target.to_string());

        path.push(target.to_string());
        if let Some(chain) = detect_cycle(type_def, target, visited, path) {
            return Some(chain);
        }
        path.pop();
    }

    None
}

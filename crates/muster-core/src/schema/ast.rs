//! Abstract syntax tree for the Muster schema language

use serde::{Deserialize, Serialize};

/// A complete parsed schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub types: Vec<TypeDef>,
}

/// A type definition with its relations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub relations: Vec<RelationDef>,
}

/// A relation definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub expr: Option<RewriteExpr>,
}

/// Userset rewrite expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriteExpr {
    /// Direct tuples on the object itself: `this`
    This,

    /// Another relation on the same object: `editor`
    ComputedUserset { relation: String },

    /// Walk `tupleset` tuples to intermediate objects and test
    /// `computed` there: `parent->viewer`
    TupleToUserset { tupleset: String, computed: String },

    /// Union: `expr1 | expr2`
    Union(Vec<RewriteExpr>),

    /// Intersection: `expr1 & expr2`
    Intersection(Vec<RewriteExpr>),

    /// Exclusion: `expr1 - expr2`
    Exclusion {
        base: Box<RewriteExpr>,
        subtract: Box<RewriteExpr>,
    },
}

impl Schema {
    pub fn new(types: Vec<TypeDef>) -> Self {
        Self { types }
    }

    /// Find a type by name
    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }
}

impl TypeDef {
    pub fn new(name: String, relations: Vec<RelationDef>) -> Self {
        Self { name, relations }
    }

    /// Find a relation by name
    pub fn find_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

impl RelationDef {
    pub fn new(name: String, expr: Option<RewriteExpr>) -> Self {
        Self { name, expr }
    }

    /// Check if this is a direct relation (no expression or `this`)
    pub fn is_direct(&self) -> bool {
        matches!(&self.expr, None | Some(RewriteExpr::This))
    }
}

impl RewriteExpr {
    /// Collect the same-object relations this expression references:
    /// computed usersets and tupleset walks. Used by publish-time
    /// validation; the far side of a `tupleset->computed` walk lives on
    /// another object and is resolved at check time.
    pub fn same_object_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            RewriteExpr::This => {},
            RewriteExpr::ComputedUserset { relation } => out.push(relation),
            RewriteExpr::TupleToUserset { tupleset, .. } => out.push(tupleset),
            RewriteExpr::Union(exprs) | RewriteExpr::Intersection(exprs) => {
                for expr in exprs {
                    expr.same_object_refs(out);
                }
            },
            RewriteExpr::Exclusion { base, subtract } => {
                base.same_object_refs(out);
                subtract.same_object_refs(out);
            },
        }
    }
}

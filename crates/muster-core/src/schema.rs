//! Muster schema language: parser, AST, and the versioned registry.

pub mod ast;
pub mod parser;
pub mod registry;

// Re-export main types
pub use ast::{RelationDef, RewriteExpr, Schema, TypeDef};
pub use parser::parse_schema;
pub use registry::{SchemaError, SchemaRegistry, SchemaSnapshot};

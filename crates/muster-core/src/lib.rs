//! # Muster Core - Schema and Check Resolution
//!
//! Authorization core for Muster. Holds the schema language (parser,
//! versioned registry), consistency token handling, and the recursive
//! check resolver that walks relation rewrites over the tuple store.

use thiserror::Error;

pub mod consistency;
pub mod resolver;
pub mod schema;

pub use consistency::{ConsistencyToken, RevisionFloor, TokenManager};
pub use resolver::{ResolveLimits, Resolver};
pub use schema::{Schema, SchemaError, SchemaRegistry, SchemaSnapshot};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Store error: {0}")]
    Store(#[from] muster_types::StoreError),

    #[error("Unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("Unknown relation {relation} on type {object_type}")]
    UnknownRelation {
        object_type: String,
        relation: String,
    },

    #[error("Resolution depth exceeded (max {max})")]
    DepthExceeded { max: usize },

    #[error("Resolution fanout exceeded (max {max})")]
    FanoutExceeded { max: usize },

    #[error("Invalid consistency token: {0}")]
    InvalidToken(String),

    #[error("Resolution task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

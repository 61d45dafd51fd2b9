//! # Muster Ingest - Reporter Ingestion Pipeline
//!
//! Turns reporter-submitted resource reports into canonical resource
//! records and projected relation tuples, committed atomically.
//!
//! A report resolves (or mints) the canonical id for its `(reporter type,
//! local resource id)` identity, projects configured attributes into
//! relation tuples, and writes the record upsert plus the tuple diff as
//! one store batch. Soft deletes tombstone the record and clear the
//! resource's tuples the same way.

#![deny(unsafe_code)]

use thiserror::Error;

pub mod ingestor;
pub mod projection;
pub mod registry;

pub use ingestor::Ingestor;
pub use projection::{Projection, ProjectionTable};
pub use registry::ReporterRegistry;

/// Errors surfaced by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown reporter type: {0}")]
    UnknownReporterType(String),

    #[error("Resource type {resource_type} not reportable by {reporter_type}")]
    UnknownResourceType { reporter_type: String, resource_type: String },

    #[error("Store error: {0}")]
    Store(#[from] muster_types::StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

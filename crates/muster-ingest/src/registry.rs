//! Known reporter types and the resource types they may report.

use std::collections::{HashMap, HashSet};

use crate::{IngestError, Result};

/// The configured set of reporters allowed to submit resources.
///
/// An empty registry runs open: any reporter may report any resource
/// type. Registering the first reporter closes the set.
#[derive(Debug, Clone, Default)]
pub struct ReporterRegistry {
    reporters: HashMap<String, Option<HashSet<String>>>,
}

impl ReporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter type, optionally restricted to specific
    /// resource types. `None` allows every resource type.
    pub fn with_reporter(
        mut self,
        reporter_type: impl Into<String>,
        resource_types: Option<Vec<String>>,
    ) -> Self {
        self.reporters
            .insert(reporter_type.into(), resource_types.map(|types| types.into_iter().collect()));
        self
    }

    pub fn is_open(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Authorize one reporter / resource-type pair.
    pub fn authorize(&self, reporter_type: &str, resource_type: &str) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let Some(allowed) = self.reporters.get(reporter_type) else {
            return Err(IngestError::UnknownReporterType(reporter_type.to_string()));
        };
        if let Some(types) = allowed {
            if !types.contains(resource_type) {
                return Err(IngestError::UnknownResourceType {
                    reporter_type: reporter_type.to_string(),
                    resource_type: resource_type.to_string(),
                });
            }
        }
        Ok(())
    }
}

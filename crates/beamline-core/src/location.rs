use std::fmt;

use serde::{Deserialize, Serialize};

/// Where events for one data source go: the logical name of the backend
/// indexing service (resolved through the coordination directory) plus the
/// data source whose segments the tasks own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendLocation {
    pub service: String,
    pub data_source: String,
}

impl BackendLocation {
    pub fn new(service: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            data_source: data_source.into(),
        }
    }
}

impl fmt::Display for BackendLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.data_source)
    }
}

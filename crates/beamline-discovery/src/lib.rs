// beamline-discovery - coordination-directory boundary and resolver
//
// The directory itself (ZooKeeper, etcd, DNS, ...) is an external
// collaborator; this crate owns the trait it must implement, the resolver
// that gives the rest of the pipeline bounded-time, churn-free membership
// views, and an in-memory directory for tests and local development.

mod memory;
mod resolver;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

pub use memory::MemoryDirectory;
pub use resolver::Resolver;

/// One live backend task, as advertised in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEndpoint {
    /// Stable task identity (survives address changes, not restarts).
    pub id: String,
    /// Network address, `host:port`.
    pub address: String,
    /// Optional capacity hint from the directory's metadata.
    pub capacity: Option<u32>,
}

impl TaskEndpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            capacity: None,
        }
    }
}

impl fmt::Display for TaskEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// A versioned snapshot of a service's live task set.
///
/// The version counts directory-side updates, including replays after a
/// reconnect; consumers that care about actual churn compare endpoint sets
/// with [`Membership::same_endpoints`] instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub endpoints: Vec<TaskEndpoint>,
    pub version: u64,
}

impl Membership {
    /// Set equality on (id, address), ignoring order and version.
    pub fn same_endpoints(&self, other: &Membership) -> bool {
        if self.endpoints.len() != other.endpoints.len() {
            return false;
        }
        let mut a: Vec<(&str, &str)> = self
            .endpoints
            .iter()
            .map(|e| (e.id.as_str(), e.address.as_str()))
            .collect();
        let mut b: Vec<(&str, &str)> = other
            .endpoints
            .iter()
            .map(|e| (e.id.as_str(), e.address.as_str()))
            .collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// Connection to the coordination directory is currently lost. The
    /// directory client is expected to reconnect and resync on its own.
    #[error("directory connection lost: {message}")]
    Disconnected { message: String },
}

/// Watch-based discovery of live task endpoints for a logical service.
///
/// Implementations maintain a live view behind `watch` and must replay the
/// current set after reconnecting to the directory; the [`Resolver`]
/// suppresses replays that carry no actual change.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Current endpoint set for `service`. An unknown service is an empty
    /// set, not an error: tasks may simply not have announced yet.
    async fn lookup(&self, service: &str) -> Result<Vec<TaskEndpoint>, DirectoryError>;

    /// Subscribe to membership updates for `service`.
    fn watch(&self, service: &str) -> watch::Receiver<Membership>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_endpoints_ignores_order_and_version() {
        let a = Membership {
            endpoints: vec![
                TaskEndpoint::new("t1", "10.0.0.1:8100"),
                TaskEndpoint::new("t2", "10.0.0.2:8100"),
            ],
            version: 1,
        };
        let b = Membership {
            endpoints: vec![
                TaskEndpoint::new("t2", "10.0.0.2:8100"),
                TaskEndpoint::new("t1", "10.0.0.1:8100"),
            ],
            version: 7,
        };
        assert!(a.same_endpoints(&b));
    }

    #[test]
    fn same_endpoints_detects_churn() {
        let a = Membership {
            endpoints: vec![TaskEndpoint::new("t1", "10.0.0.1:8100")],
            version: 1,
        };
        let moved = Membership {
            endpoints: vec![TaskEndpoint::new("t1", "10.0.0.9:8100")],
            version: 2,
        };
        let gone = Membership::default();
        assert!(!a.same_endpoints(&moved));
        assert!(!a.same_endpoints(&gone));
    }
}

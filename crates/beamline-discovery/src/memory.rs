use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{Directory, DirectoryError, Membership, TaskEndpoint};

/// In-memory directory for tests and local development.
///
/// Supports the full churn surface the real directory exhibits: tasks
/// announcing and disappearing, and reconnect-style replays of an
/// unchanged set. Lookups are counted so tests can assert single-flight
/// behavior in the layers above.
#[derive(Default)]
pub struct MemoryDirectory {
    services: Mutex<HashMap<String, ServiceEntry>>,
    lookups: AtomicU64,
    failing_lookups: AtomicU64,
}

struct ServiceEntry {
    endpoints: Vec<TaskEndpoint>,
    version: u64,
    tx: watch::Sender<Membership>,
}

impl ServiceEntry {
    fn new() -> Self {
        let (tx, _) = watch::channel(Membership::default());
        Self {
            endpoints: Vec::new(),
            version: 0,
            tx,
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        let _ = self.tx.send(Membership {
            endpoints: self.endpoints.clone(),
            version: self.version,
        });
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a task for `service`, replacing any endpoint with the
    /// same id.
    pub fn register(&self, service: &str, endpoint: TaskEndpoint) {
        let mut services = self.services.lock();
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.endpoints.retain(|e| e.id != endpoint.id);
        entry.endpoints.push(endpoint);
        entry.publish();
    }

    pub fn deregister(&self, service: &str, endpoint_id: &str) {
        let mut services = self.services.lock();
        if let Some(entry) = services.get_mut(service) {
            entry.endpoints.retain(|e| e.id != endpoint_id);
            entry.publish();
        }
    }

    /// Replace the full endpoint set in one update.
    pub fn set_endpoints(&self, service: &str, endpoints: Vec<TaskEndpoint>) {
        let mut services = self.services.lock();
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.endpoints = endpoints;
        entry.publish();
    }

    /// Re-send the current set with a bumped version, as a directory
    /// client does when it reconnects and resyncs.
    pub fn replay(&self, service: &str) {
        let mut services = self.services.lock();
        if let Some(entry) = services.get_mut(service) {
            entry.publish();
        }
    }

    /// Make the next `n` lookups fail as if the directory connection
    /// dropped.
    pub fn fail_next_lookups(&self, n: u64) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }

    /// Number of lookups served (including failed ones).
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn lookup(&self, service: &str) -> Result<Vec<TaskEndpoint>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_lookups.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lookups.store(failing - 1, Ordering::SeqCst);
            return Err(DirectoryError::Disconnected {
                message: "scripted connection loss".into(),
            });
        }

        let services = self.services.lock();
        Ok(services
            .get(service)
            .map(|entry| entry.endpoints.clone())
            .unwrap_or_default())
    }

    fn watch(&self, service: &str) -> watch::Receiver<Membership> {
        let mut services = self.services.lock();
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.tx.subscribe()
    }
}

use std::sync::Arc;
use std::time::Duration;

use beamline_core::SendError;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{Directory, Membership, TaskEndpoint};

/// Bounded-time membership resolution over a [`Directory`].
///
/// `resolve` waits for a non-empty task set up to the configured timeout;
/// `subscribe` re-publishes directory updates only when the endpoint set
/// actually changed, so a directory reconnect that replays an identical
/// set signals no churn downstream.
pub struct Resolver {
    directory: Arc<dyn Directory>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(directory: Arc<dyn Directory>, timeout: Duration) -> Self {
        Self { directory, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a non-empty endpoint set for `service`, waiting up to the
    /// resolver timeout for tasks to announce.
    pub async fn resolve(&self, service: &str) -> Result<Vec<TaskEndpoint>, SendError> {
        match tokio::time::timeout(self.timeout, self.wait_for_members(service)).await {
            Ok(endpoints) => Ok(endpoints),
            Err(_) => Err(SendError::ResolutionTimeout {
                service: service.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn wait_for_members(&self, service: &str) -> Vec<TaskEndpoint> {
        let mut rx = self.directory.watch(service);
        loop {
            match self.directory.lookup(service).await {
                Ok(endpoints) if !endpoints.is_empty() => return endpoints,
                Ok(_) => {}
                Err(err) => {
                    warn!(service, error = %err, "directory lookup failed, waiting for resync");
                }
            }

            // Wait for the next membership update before looking again; if
            // the directory dropped the channel, back off briefly and retry
            // the lookup. The caller's timeout bounds the whole wait.
            {
                let current = rx.borrow_and_update();
                if !current.endpoints.is_empty() {
                    return current.endpoints.clone();
                }
            }
            if rx.changed().await.is_err() {
                tokio::time::sleep(Duration::from_millis(50)).await;
                rx = self.directory.watch(service);
            }
        }
    }

    /// Subscribe to actual membership changes for `service`.
    ///
    /// Version-only updates (reconnect replays of an unchanged set) are
    /// suppressed.
    pub fn subscribe(&self, service: &str) -> watch::Receiver<Membership> {
        let mut upstream = self.directory.watch(service);
        let initial = upstream.borrow().clone();
        let (tx, rx) = watch::channel(initial.clone());
        let service = service.to_string();

        tokio::spawn(async move {
            let mut last = initial;
            while upstream.changed().await.is_ok() {
                let next = upstream.borrow_and_update().clone();
                if next.same_endpoints(&last) {
                    debug!(service = %service, version = next.version, "suppressed membership replay");
                    continue;
                }
                last = next.clone();
                if tx.send(next).is_err() {
                    break;
                }
            }
        });

        rx
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use beamline_core::{SegmentKey, SendError};
use beamline_discovery::{Resolver, TaskEndpoint};
use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::retry::DeliveryPolicy;
use crate::transport::{SegmentSpec, TaskBatch, TaskResponse, TaskTransport};

/// Lifecycle of one delivery slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamStatus {
    /// Created, endpoint not yet confirmed reachable.
    Warming,
    /// Confirmed and delivering.
    Active,
    /// Window closed; finishing in-flight sends, accepting no new ones.
    Draining,
    /// Done. The router must not send here again.
    Closed,
}

/// Delivery handle for one (segment, partition, replicant) slot.
///
/// Owns its endpoint and retry budget. Transient failures are retried
/// here with backoff and endpoint re-resolution; everything else surfaces
/// to the caller.
pub struct Beam {
    segment: SegmentKey,
    partition: usize,
    replicant: usize,
    /// Flat slot index used to pick this beam's endpoint from the
    /// membership set, stable across re-resolution.
    slot: usize,
    service: String,
    endpoint: Mutex<TaskEndpoint>,
    status: Mutex<BeamStatus>,
    in_flight: AtomicUsize,
    transport: Arc<dyn TaskTransport>,
    resolver: Arc<Resolver>,
    policy: DeliveryPolicy,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Beam {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        segment: SegmentKey,
        partition: usize,
        replicant: usize,
        slot: usize,
        service: String,
        endpoint: TaskEndpoint,
        transport: Arc<dyn TaskTransport>,
        resolver: Arc<Resolver>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            segment,
            partition,
            replicant,
            slot,
            service,
            endpoint: Mutex::new(endpoint),
            status: Mutex::new(BeamStatus::Warming),
            in_flight: AtomicUsize::new(0),
            transport,
            resolver,
            policy,
        }
    }

    pub fn segment(&self) -> SegmentKey {
        self.segment
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn replicant(&self) -> usize {
        self.replicant
    }

    pub fn status(&self) -> BeamStatus {
        *self.status.lock()
    }

    pub fn endpoint(&self) -> TaskEndpoint {
        self.endpoint.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Declare the slot on the backend and confirm reachability.
    ///
    /// Best-effort: an unreachable task leaves the beam Warming and the
    /// first successful push promotes it instead.
    pub(crate) async fn open(&self, spec: &SegmentSpec) {
        let endpoint = self.endpoint();
        match self.transport.open(&endpoint, spec).await {
            TaskResponse::Ack { .. } => {
                self.promote();
                debug!(segment = %self.segment, partition = self.partition,
                       replicant = self.replicant, endpoint = %endpoint, "beam active");
            }
            TaskResponse::SegmentClosed => {
                warn!(segment = %self.segment, "task reports segment closed at open");
                self.close();
            }
            other => {
                warn!(segment = %self.segment, partition = self.partition,
                      endpoint = %endpoint, response = ?other,
                      "beam open unconfirmed, staying warm");
            }
        }
    }

    pub(crate) fn begin_drain(&self) {
        let mut status = self.status.lock();
        if matches!(*status, BeamStatus::Warming | BeamStatus::Active) {
            *status = BeamStatus::Draining;
        }
    }

    pub(crate) fn close(&self) {
        *self.status.lock() = BeamStatus::Closed;
    }

    fn promote(&self) {
        let mut status = self.status.lock();
        if *status == BeamStatus::Warming {
            *status = BeamStatus::Active;
        }
    }

    /// Deliver a batch of serialized events to this slot's task.
    ///
    /// Retries `Unreachable` (and push timeouts) with jittered backoff and
    /// endpoint re-resolution up to the policy's attempt budget. `Reject`
    /// is terminal; `SegmentClosed` closes the beam and surfaces as a
    /// late event.
    pub async fn send(&self, events: &[Bytes]) -> Result<usize, SendError> {
        if self.status() == BeamStatus::Closed {
            return Err(SendError::LateEvent {
                segment: self.segment,
                lateness_ms: 0,
            });
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let batch = TaskBatch {
            segment: self.segment,
            partition: self.partition,
            events: events.to_vec(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let endpoint = self.endpoint();
            let response =
                match tokio::time::timeout(self.policy.push_timeout, self.transport.push(&endpoint, &batch))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => TaskResponse::Unreachable {
                        reason: format!(
                            "push timed out after {}ms",
                            self.policy.push_timeout.as_millis()
                        ),
                    },
                };

            match response {
                TaskResponse::Ack { count } => {
                    self.promote();
                    counter!("beamline.beam.pushes", 1);
                    return Ok(count);
                }
                TaskResponse::SegmentClosed => {
                    info!(segment = %self.segment, partition = self.partition,
                          "task closed the segment, beam retiring");
                    self.close();
                    return Err(SendError::LateEvent {
                        segment: self.segment,
                        lateness_ms: 0,
                    });
                }
                TaskResponse::Reject { reason } => {
                    counter!("beamline.beam.rejects", 1);
                    return Err(SendError::Delivery {
                        segment: self.segment,
                        partition: self.partition,
                        attempts: attempt,
                        reason: format!("rejected by task: {}", reason),
                    });
                }
                TaskResponse::Unreachable { reason } => {
                    if attempt >= self.policy.max_attempts {
                        counter!("beamline.beam.exhausted", 1);
                        return Err(SendError::Delivery {
                            segment: self.segment,
                            partition: self.partition,
                            attempts: attempt,
                            reason,
                        });
                    }
                    counter!("beamline.beam.retries", 1);
                    warn!(segment = %self.segment, partition = self.partition,
                          endpoint = %endpoint, attempt, reason = %reason,
                          "push failed, backing off and re-resolving");
                    tokio::time::sleep(self.policy.backoff.jittered_delay(attempt)).await;
                    self.refresh_endpoint().await;
                }
            }
        }
    }

    /// Re-pick this slot's endpoint from a fresh membership view. Keeps
    /// the current endpoint if resolution fails; the next retry will try
    /// again.
    async fn refresh_endpoint(&self) {
        match self.resolver.resolve(&self.service).await {
            Ok(endpoints) if !endpoints.is_empty() => {
                let fresh = endpoints[self.slot % endpoints.len()].clone();
                let mut current = self.endpoint.lock();
                if fresh.id != current.id || fresh.address != current.address {
                    info!(segment = %self.segment, partition = self.partition,
                          old = %*current, new = %fresh, "beam endpoint moved");
                    *current = fresh;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(service = %self.service, error = %err,
                      "re-resolution failed, keeping stale endpoint");
            }
        }
    }
}

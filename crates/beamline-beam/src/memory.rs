use std::collections::HashSet;

use async_trait::async_trait;
use beamline_core::SegmentKey;
use beamline_discovery::TaskEndpoint;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::transport::{SegmentSpec, TaskBatch, TaskResponse, TaskTransport};

/// In-memory transport for tests and local development.
///
/// Records every open and push, and scripts the failure modes the beams
/// must survive: N transient failures, endpoints that stay unreachable,
/// and segments the backend has closed.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    fail_next_pushes: u32,
    reject_next_pushes: u32,
    unreachable: HashSet<String>,
    closed_segments: HashSet<SegmentKey>,
    opens: Vec<(String, SegmentKey, usize)>,
    pushes: Vec<RecordedPush>,
    push_attempts: u64,
}

#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub endpoint: String,
    pub segment: SegmentKey,
    pub partition: usize,
    pub events: Vec<Bytes>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` pushes answer `Unreachable` regardless of endpoint.
    pub fn fail_next_pushes(&self, n: u32) {
        self.state.lock().fail_next_pushes = n;
    }

    /// The next `n` pushes answer `Reject`.
    pub fn reject_next_pushes(&self, n: u32) {
        self.state.lock().reject_next_pushes = n;
    }

    /// Mark an endpoint (by task id) unreachable until cleared.
    pub fn set_unreachable(&self, endpoint_id: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(endpoint_id.to_string());
        } else {
            state.unreachable.remove(endpoint_id);
        }
    }

    /// The backend stops accepting writes for `segment`.
    pub fn close_segment(&self, segment: SegmentKey) {
        self.state.lock().closed_segments.insert(segment);
    }

    /// Serialized events acknowledged for one (segment, partition), in
    /// arrival order.
    pub fn delivered(&self, segment: SegmentKey, partition: usize) -> Vec<Bytes> {
        self.state
            .lock()
            .pushes
            .iter()
            .filter(|p| p.segment == segment && p.partition == partition)
            .flat_map(|p| p.events.iter().cloned())
            .collect()
    }

    /// Every acknowledged push, in arrival order.
    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state.lock().pushes.clone()
    }

    /// Total push attempts, including failed ones.
    pub fn push_attempts(&self) -> u64 {
        self.state.lock().push_attempts
    }

    /// (endpoint id, segment, partition) for every successful open.
    pub fn opens(&self) -> Vec<(String, SegmentKey, usize)> {
        self.state.lock().opens.clone()
    }
}

#[async_trait]
impl TaskTransport for MemoryTransport {
    async fn open(&self, endpoint: &TaskEndpoint, spec: &SegmentSpec) -> TaskResponse {
        let mut state = self.state.lock();
        if state.unreachable.contains(&endpoint.id) {
            return TaskResponse::Unreachable {
                reason: format!("endpoint {} unreachable", endpoint),
            };
        }
        state
            .opens
            .push((endpoint.id.clone(), spec.segment, spec.partition));
        TaskResponse::Ack { count: 0 }
    }

    async fn push(&self, endpoint: &TaskEndpoint, batch: &TaskBatch) -> TaskResponse {
        let mut state = self.state.lock();
        state.push_attempts += 1;

        if state.closed_segments.contains(&batch.segment) {
            return TaskResponse::SegmentClosed;
        }
        if state.fail_next_pushes > 0 {
            state.fail_next_pushes -= 1;
            return TaskResponse::Unreachable {
                reason: "scripted transient failure".into(),
            };
        }
        if state.reject_next_pushes > 0 {
            state.reject_next_pushes -= 1;
            return TaskResponse::Reject {
                reason: "scripted reject".into(),
            };
        }
        if state.unreachable.contains(&endpoint.id) {
            return TaskResponse::Unreachable {
                reason: format!("endpoint {} unreachable", endpoint),
            };
        }

        state.pushes.push(RecordedPush {
            endpoint: endpoint.id.clone(),
            segment: batch.segment,
            partition: batch.partition,
            events: batch.events.clone(),
        });
        TaskResponse::Ack {
            count: batch.events.len(),
        }
    }
}

use async_trait::async_trait;
use beamline_core::{BackendLocation, RollupSchema, SegmentKey};
use beamline_discovery::TaskEndpoint;
use bytes::Bytes;

/// Everything a backend task needs to start accepting writes for one
/// (segment, partition) slot: where it lives and what to roll events up
/// into.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub location: BackendLocation,
    pub segment: SegmentKey,
    pub partition: usize,
    pub rollup: RollupSchema,
}

/// One wire exchange: serialized events for a single (segment, partition).
#[derive(Debug, Clone)]
pub struct TaskBatch {
    pub segment: SegmentKey,
    pub partition: usize,
    pub events: Vec<Bytes>,
}

/// The backend's answer, as a closed set of cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResponse {
    /// The task applied `count` events.
    Ack { count: usize },
    /// The task refused the batch; retrying the same bytes will not help.
    Reject { reason: String },
    /// The task could not be reached; retry against a fresh endpoint.
    Unreachable { reason: String },
    /// The task no longer accepts writes for this segment.
    SegmentClosed,
}

/// Request/response exchange with one backend task.
///
/// The wire protocol itself (HTTP, gRPC, ...) is the implementor's
/// business; the client only depends on this surface. Implementations
/// must be safe to retry: an `open` or `push` may be re-issued after a
/// timeout even if the previous attempt landed (at-least-once delivery,
/// idempotent backend acks).
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Declare a (segment, partition) slot on a task and confirm it is
    /// reachable. Idempotent.
    async fn open(&self, endpoint: &TaskEndpoint, spec: &SegmentSpec) -> TaskResponse;

    /// Deliver a batch of serialized events.
    async fn push(&self, endpoint: &TaskEndpoint, batch: &TaskBatch) -> TaskResponse;
}

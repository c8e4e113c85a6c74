use thiserror::Error;

use crate::segment::SegmentKey;

/// Outcome of a successfully delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Segment the event was routed to.
    pub segment: SegmentKey,
    /// Partition index within the segment.
    pub partition: usize,
}

/// What a per-event future resolves to.
pub type SendResult = std::result::Result<SendReceipt, SendError>;

/// Every way a send can definitively fail.
///
/// Cloneable by design: one failed batch resolves the promises of every
/// event in it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The event's segment window has already closed. Never retried.
    #[error("event is {lateness_ms}ms past the window for segment {segment}")]
    LateEvent {
        segment: SegmentKey,
        lateness_ms: i64,
    },

    /// The event's segment starts beyond the warming allowance. Never retried.
    #[error("segment {segment} starts {lead_ms}ms from now, beyond the warming period")]
    FutureEvent { segment: SegmentKey, lead_ms: i64 },

    /// The coordination directory did not yield a usable task set in time.
    #[error("resolving service '{service}' timed out after {timeout_ms}ms")]
    ResolutionTimeout { service: String, timeout_ms: u64 },

    /// The backend rejected the batch or stayed unreachable through the
    /// whole retry budget.
    #[error(
        "delivery to segment {segment} partition {partition} failed after {attempts} attempt(s): {reason}"
    )]
    Delivery {
        segment: SegmentKey,
        partition: usize,
        attempts: u32,
        reason: String,
    },

    /// The send queue was full under the fail-fast backpressure policy.
    #[error("send queue over capacity ({capacity} events)")]
    OverCapacity { capacity: usize },

    /// The client shut down before this event was delivered.
    #[error("client shut down before the event was delivered")]
    Shutdown,

    /// The caller-supplied serializer failed for this event.
    #[error("failed to serialize event: {message}")]
    Serialization { message: String },
}

impl SendError {
    /// Short stable name, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::LateEvent { .. } => "late_event",
            SendError::FutureEvent { .. } => "future_event",
            SendError::ResolutionTimeout { .. } => "resolution_timeout",
            SendError::Delivery { .. } => "delivery",
            SendError::OverCapacity { .. } => "over_capacity",
            SendError::Shutdown => "shutdown",
            SendError::Serialization { .. } => "serialization",
        }
    }

    /// Whether a higher layer could meaningfully retry the same event.
    ///
    /// Late and future events will keep failing the window check; a
    /// serialization failure is deterministic.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            SendError::ResolutionTimeout { .. }
                | SendError::Delivery { .. }
                | SendError::OverCapacity { .. }
        )
    }
}

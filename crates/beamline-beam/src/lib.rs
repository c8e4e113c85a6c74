// beamline-beam - delivery handles and the clustered router
//
// A Beam is the delivery handle for one (segment, partition, replicant)
// slot; the BeamRouter owns the ordered segment map, creates beam sets
// lazily (single-flight), fans events out across partitions and
// replicants, and retires segments once their window closes.

mod beam;
mod cluster;
mod memory;
mod retry;
mod transport;

pub use beam::{Beam, BeamStatus};
pub use cluster::{BeamRouter, SegmentBeams, SweepStats};
pub use memory::{MemoryTransport, RecordedPush};
pub use retry::{BackoffPolicy, DeliveryPolicy};
pub use transport::{SegmentSpec, TaskBatch, TaskResponse, TaskTransport};

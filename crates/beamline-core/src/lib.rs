// beamline-core - data model and pluggable boundaries
//
// Everything the delivery pipeline agrees on lives here: segment keys and
// granularities, cluster tuning, the rollup schema declared to backend
// tasks, the caller-supplied extraction/serialization boundaries, and the
// send-error taxonomy. No I/O in this crate.

mod clock;
mod error;
mod location;
mod partition;
mod rollup;
mod segment;
mod serialize;
mod timestamp;
mod tuning;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SendError, SendReceipt, SendResult};
pub use location::BackendLocation;
pub use partition::{KeyPartitioner, Partitioner};
pub use rollup::{Aggregator, QueryGranularity, RollupSchema};
pub use segment::{SegmentGranularity, SegmentKey};
pub use serialize::{EventSerializer, JsonSerializer, SerializeError};
pub use timestamp::Timestamper;
pub use tuning::{ClusterTuning, ClusterTuningBuilder, TuningError};

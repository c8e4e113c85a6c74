// beamline-client - the caller-facing facade
//
// Accepts events, queues them in bounded per-worker queues, drives
// delivery through the clustered beam router, and hands the caller a
// future per event that resolves to a definite outcome.

mod builder;
mod tranquilizer;

pub use builder::{BuildError, TranquilizerBuilder};
pub use tranquilizer::{BackpressurePolicy, SendFuture, Tranquilizer, TranquilizerConfig};

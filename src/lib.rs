//! beamline - windowed, partition-aware event delivery client.
//!
//! Callers hand beamline timestamped events; beamline routes each one to
//! the backend ingestion task owning the event's time segment, creating
//! segments lazily as time advances, retiring them once their lateness
//! window closes, and riding out task churn behind a coordination
//! directory. Every `send` returns a future that settles with a definite
//! outcome: an acknowledgement receipt or a typed failure.
//!
//! The wire encoding, the directory client, and the backend protocol are
//! pluggable boundaries ([`EventSerializer`], [`Directory`],
//! [`TaskTransport`]); in-memory implementations of the latter two ship
//! for tests and local development.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use beamline::{
//!     Aggregator, BackendLocation, ClusterTuning, MemoryDirectory, MemoryTransport,
//!     QueryGranularity, RollupSchema, SegmentGranularity, TaskEndpoint, Tranquilizer,
//! };
//! use chrono::{DateTime, Utc};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct PageView {
//!     timestamp: DateTime<Utc>,
//!     page: String,
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let directory = Arc::new(MemoryDirectory::new());
//! directory.register("overlord", TaskEndpoint::new("task-1", "10.0.0.1:8100"));
//!
//! let client = Tranquilizer::builder(|e: &PageView| e.timestamp)
//!     .directory(directory)
//!     .transport(Arc::new(MemoryTransport::new()))
//!     .location(BackendLocation::new("overlord", "pageviews"))
//!     .rollup(RollupSchema::new(
//!         vec!["page".into()],
//!         vec![Aggregator::count("views")],
//!         QueryGranularity::Minute,
//!     ))
//!     .tuning(
//!         ClusterTuning::builder()
//!             .segment_granularity(SegmentGranularity::Hour)
//!             .window_period(Duration::from_secs(600))
//!             .build()?,
//!     )
//!     .json()
//!     .build()?;
//!
//! client.start();
//! let receipt = client
//!     .send(&PageView { timestamp: Utc::now(), page: "/".into() })
//!     .await
//!     .await?;
//! println!("delivered to segment {}", receipt.segment);
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

pub use beamline_core::{
    Aggregator, BackendLocation, Clock, ClusterTuning, ClusterTuningBuilder, EventSerializer,
    JsonSerializer, KeyPartitioner, ManualClock, Partitioner, QueryGranularity, RollupSchema,
    SegmentGranularity, SegmentKey, SendError, SendReceipt, SendResult, SerializeError,
    SystemClock, Timestamper, TuningError,
};

pub use beamline_discovery::{
    Directory, DirectoryError, Membership, MemoryDirectory, Resolver, TaskEndpoint,
};

pub use beamline_beam::{
    BackoffPolicy, Beam, BeamRouter, BeamStatus, DeliveryPolicy, MemoryTransport, RecordedPush,
    SegmentBeams, SegmentSpec, SweepStats, TaskBatch, TaskResponse, TaskTransport,
};

pub use beamline_client::{
    BackpressurePolicy, BuildError, SendFuture, Tranquilizer, TranquilizerBuilder,
    TranquilizerConfig,
};

pub use beamline_config as config;

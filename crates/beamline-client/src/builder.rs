use std::sync::Arc;
use std::time::Duration;

use beamline_beam::{BeamRouter, DeliveryPolicy, TaskTransport};
use beamline_core::{
    BackendLocation, Clock, ClusterTuning, EventSerializer, JsonSerializer, Partitioner,
    RollupSchema, SystemClock, Timestamper, TuningError,
};
use beamline_discovery::{Directory, Resolver};
use thiserror::Error;

use crate::tranquilizer::{Tranquilizer, TranquilizerConfig};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("a coordination directory is required")]
    MissingDirectory,
    #[error("a task transport is required")]
    MissingTransport,
    #[error("a backend location is required")]
    MissingLocation,
    #[error("an event serializer is required (JSON-serializable events can use json())")]
    MissingSerializer,
    #[error(transparent)]
    Tuning(#[from] TuningError),
}

/// Assembles a [`Tranquilizer`] from its boundaries and tuning.
///
/// Required: the timestamper (constructor), a directory, a transport and
/// a location. Everything else has defaults matching a single-partition
/// hourly setup.
pub struct TranquilizerBuilder<T: ?Sized> {
    timestamper: Arc<dyn Timestamper<T>>,
    serializer: Option<Arc<dyn EventSerializer<T>>>,
    partitioner: Option<Arc<dyn Partitioner<T>>>,
    directory: Option<Arc<dyn Directory>>,
    transport: Option<Arc<dyn TaskTransport>>,
    location: Option<BackendLocation>,
    rollup: RollupSchema,
    tuning: ClusterTuning,
    delivery: DeliveryPolicy,
    resolution_timeout: Duration,
    config: TranquilizerConfig,
    clock: Arc<dyn Clock>,
}

impl<T> TranquilizerBuilder<T> {
    pub(crate) fn new(timestamper: impl Timestamper<T> + 'static) -> Self {
        Self {
            timestamper: Arc::new(timestamper),
            serializer: None,
            partitioner: None,
            directory: None,
            transport: None,
            location: None,
            rollup: RollupSchema::default(),
            tuning: ClusterTuning::default(),
            delivery: DeliveryPolicy::default(),
            resolution_timeout: Duration::from_secs(10),
            config: TranquilizerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn TaskTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn location(mut self, location: BackendLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn serializer(mut self, serializer: impl EventSerializer<T> + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Install a partitioner. Events with the same partition key are then
    /// pinned to one partition (hash placement) and one worker, which is
    /// what keeps partitioned rollup and per-key ordering correct.
    /// Without a partitioner, partitions are assigned round-robin.
    pub fn partitioner(mut self, partitioner: impl Partitioner<T> + 'static) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    pub fn rollup(mut self, rollup: RollupSchema) -> Self {
        self.rollup = rollup;
        self
    }

    pub fn tuning(mut self, tuning: ClusterTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn delivery_policy(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn resolution_timeout(mut self, timeout: Duration) -> Self {
        self.resolution_timeout = timeout;
        self
    }

    pub fn config(mut self, config: TranquilizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Tranquilizer<T>, BuildError> {
        let directory = self.directory.ok_or(BuildError::MissingDirectory)?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let location = self.location.ok_or(BuildError::MissingLocation)?;
        let serializer = self.serializer.ok_or(BuildError::MissingSerializer)?;
        self.tuning.validate()?;

        let resolver = Arc::new(Resolver::new(directory, self.resolution_timeout));
        let router = Arc::new(BeamRouter::new(
            location,
            self.rollup,
            self.tuning,
            self.delivery,
            resolver,
            transport,
            self.clock,
        ));

        Ok(Tranquilizer::from_parts(
            router,
            self.config,
            self.timestamper,
            serializer,
            self.partitioner,
        ))
    }
}

impl<T: serde::Serialize> TranquilizerBuilder<T> {
    /// Use the default JSON serializer for the event type.
    pub fn json(self) -> Self {
        self.serializer(JsonSerializer)
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beamline_core::{
    BackendLocation, Clock, ClusterTuning, RollupSchema, SegmentKey, SendError, SendReceipt,
};
use beamline_discovery::Resolver;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::beam::{Beam, BeamStatus};
use crate::retry::DeliveryPolicy;
use crate::transport::{SegmentSpec, TaskTransport};

/// The beam set for one live segment: `partitions x replicants` beams.
///
/// Built whole before anyone can see it; readers never observe a
/// partially-constructed set.
pub struct SegmentBeams {
    segment: SegmentKey,
    partitions: Vec<PartitionSlot>,
}

struct PartitionSlot {
    beams: Vec<Arc<Beam>>,
    cursor: AtomicUsize,
}

impl SegmentBeams {
    pub fn segment(&self) -> SegmentKey {
        self.segment
    }

    pub fn beam(&self, partition: usize, replicant: usize) -> Option<&Arc<Beam>> {
        self.partitions.get(partition)?.beams.get(replicant)
    }

    pub fn in_flight(&self) -> usize {
        self.partitions
            .iter()
            .flat_map(|slot| slot.beams.iter())
            .map(|beam| beam.in_flight())
            .sum()
    }

    fn begin_drain(&self) {
        for slot in &self.partitions {
            for beam in &slot.beams {
                beam.begin_drain();
            }
        }
    }

    fn close(&self) {
        for slot in &self.partitions {
            for beam in &slot.beams {
                beam.close();
            }
        }
    }

    /// Deliver to one replicant of `partition`, failing over to the other
    /// replicants of the same partition before giving up. Replicants are
    /// redundancy, not multi-delivery: exactly one receives the batch.
    async fn deliver(&self, partition: usize, events: &[Bytes]) -> Result<usize, SendError> {
        let slot = self.partitions.get(partition).ok_or(SendError::Delivery {
            segment: self.segment,
            partition,
            attempts: 0,
            reason: "partition index out of range".into(),
        })?;

        let n = slot.beams.len();
        let start = slot.cursor.fetch_add(1, Ordering::Relaxed);
        let mut last_err: Option<SendError> = None;

        for i in 0..n {
            let beam = &slot.beams[(start + i) % n];
            if beam.status() == BeamStatus::Closed {
                last_err.get_or_insert(SendError::LateEvent {
                    segment: self.segment,
                    lateness_ms: 0,
                });
                continue;
            }
            match beam.send(events).await {
                Ok(count) => return Ok(count),
                // A task closing the segment closes it for every replicant.
                Err(err @ SendError::LateEvent { .. }) => return Err(err),
                Err(err) => {
                    warn!(segment = %self.segment, partition,
                          replicant = beam.replicant(), error = %err,
                          "replicant failed, trying next");
                    counter!("beamline.router.failovers", 1);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(SendError::Delivery {
            segment: self.segment,
            partition,
            attempts: 0,
            reason: "no replicants available".into(),
        }))
    }
}

struct SegmentEntry {
    beams: OnceCell<Arc<SegmentBeams>>,
}

impl SegmentEntry {
    fn new() -> Self {
        Self {
            beams: OnceCell::new(),
        }
    }
}

/// Result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub evicted: usize,
    pub warmed: usize,
}

/// The clustered beam manager: routes each event to the beam set for its
/// time segment, creating segments lazily (exactly once under concurrent
/// first-touch) and retiring them once their window closes.
pub struct BeamRouter {
    location: BackendLocation,
    rollup: RollupSchema,
    tuning: ClusterTuning,
    policy: DeliveryPolicy,
    resolver: Arc<Resolver>,
    transport: Arc<dyn TaskTransport>,
    clock: Arc<dyn Clock>,
    segments: Mutex<BTreeMap<SegmentKey, Arc<SegmentEntry>>>,
    partition_cursor: AtomicUsize,
}

impl BeamRouter {
    pub fn new(
        location: BackendLocation,
        rollup: RollupSchema,
        tuning: ClusterTuning,
        policy: DeliveryPolicy,
        resolver: Arc<Resolver>,
        transport: Arc<dyn TaskTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            location,
            rollup,
            tuning,
            policy,
            resolver,
            transport,
            clock,
            segments: Mutex::new(BTreeMap::new()),
            partition_cursor: AtomicUsize::new(0),
        }
    }

    pub fn tuning(&self) -> &ClusterTuning {
        &self.tuning
    }

    /// Segment keys currently in the map, oldest first.
    pub fn live_segments(&self) -> Vec<SegmentKey> {
        self.segments.lock().keys().copied().collect()
    }

    /// Map an event timestamp to its segment, enforcing the liveness
    /// window.
    ///
    /// An event is late once its timestamp is more than the window period
    /// behind now. This is strictly tighter than requiring the segment to
    /// be open (`now <= end + window`), so a live segment never receives
    /// an event the window no longer covers. Future events are checked
    /// against the segment boundary: anything inside an already-started
    /// segment is deliverable, beyond that the warming allowance applies.
    pub fn check_segment(&self, timestamp: DateTime<Utc>) -> Result<SegmentKey, SendError> {
        let segment = SegmentKey::containing(timestamp, self.tuning.segment_granularity);
        let now_ms = self.clock.now().timestamp_millis();

        let lateness_ms =
            now_ms - timestamp.timestamp_millis() - self.tuning.window_period_millis();
        if lateness_ms > 0 {
            counter!("beamline.router.late_events", 1);
            return Err(SendError::LateEvent {
                segment,
                lateness_ms,
            });
        }

        let lead_ms = segment.start().timestamp_millis() - now_ms;
        if lead_ms > self.tuning.warming_period_millis() {
            counter!("beamline.router.future_events", 1);
            return Err(SendError::FutureEvent { segment, lead_ms });
        }

        Ok(segment)
    }

    /// Partition index for an event: stable hash placement when the event
    /// has a partition key, round-robin otherwise.
    pub fn partition_for(&self, partition_hash: Option<u64>) -> usize {
        match partition_hash {
            Some(hash) => (hash % self.tuning.partitions as u64) as usize,
            None => self.partition_cursor.fetch_add(1, Ordering::Relaxed) % self.tuning.partitions,
        }
    }

    /// Route a single serialized event.
    pub async fn route(
        &self,
        timestamp: DateTime<Utc>,
        partition_hash: Option<u64>,
        payload: Bytes,
    ) -> Result<SendReceipt, SendError> {
        let segment = self.check_segment(timestamp)?;
        let partition = self.partition_for(partition_hash);
        self.deliver(segment, partition, &[payload]).await?;
        Ok(SendReceipt { segment, partition })
    }

    /// Deliver a pre-grouped batch to one (segment, partition).
    pub async fn deliver(
        &self,
        segment: SegmentKey,
        partition: usize,
        events: &[Bytes],
    ) -> Result<usize, SendError> {
        let beams = self.beams_for(segment).await?;
        beams.deliver(partition, events).await
    }

    /// Look up or lazily create the beam set for `segment`.
    ///
    /// Creation is single-flight: concurrent first-touches share one
    /// resolver lookup and one beam set. A failed creation removes the
    /// pending entry so a later event can try again.
    pub async fn beams_for(&self, segment: SegmentKey) -> Result<Arc<SegmentBeams>, SendError> {
        let entry = {
            let mut segments = self.segments.lock();
            segments
                .entry(segment)
                .or_insert_with(|| Arc::new(SegmentEntry::new()))
                .clone()
        };

        match entry
            .beams
            .get_or_try_init(|| self.create_beams(segment))
            .await
        {
            Ok(beams) => Ok(beams.clone()),
            Err(err) => {
                let mut segments = self.segments.lock();
                if let Some(current) = segments.get(&segment) {
                    if Arc::ptr_eq(current, &entry) && current.beams.get().is_none() {
                        segments.remove(&segment);
                    }
                }
                Err(err)
            }
        }
    }

    async fn create_beams(&self, segment: SegmentKey) -> Result<Arc<SegmentBeams>, SendError> {
        let endpoints = self.resolver.resolve(&self.location.service).await?;

        let replicants = self.tuning.replicants;
        let mut partitions = Vec::with_capacity(self.tuning.partitions);
        for partition in 0..self.tuning.partitions {
            let mut beams = Vec::with_capacity(replicants);
            for replicant in 0..replicants {
                let slot = partition * replicants + replicant;
                let endpoint = endpoints[slot % endpoints.len()].clone();
                let beam = Arc::new(Beam::new(
                    segment,
                    partition,
                    replicant,
                    slot,
                    self.location.service.clone(),
                    endpoint,
                    self.transport.clone(),
                    self.resolver.clone(),
                    self.policy.clone(),
                ));
                let spec = SegmentSpec {
                    location: self.location.clone(),
                    segment,
                    partition,
                    rollup: self.rollup.clone(),
                };
                beam.open(&spec).await;
                beams.push(beam);
            }
            partitions.push(PartitionSlot {
                beams,
                cursor: AtomicUsize::new(0),
            });
        }

        counter!("beamline.segments.created", 1);
        info!(segment = %segment, partitions = self.tuning.partitions,
              replicants, tasks = endpoints.len(), "segment beams created");

        Ok(Arc::new(SegmentBeams {
            segment,
            partitions,
        }))
    }

    /// One maintenance pass: drain and evict segments past their window,
    /// pre-create the segment the warming period reaches into.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();

        let snapshot: Vec<(SegmentKey, Arc<SegmentEntry>)> = self
            .segments
            .lock()
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();

        for (key, entry) in snapshot {
            let expired =
                now_ms - key.end().timestamp_millis() > self.tuning.window_period_millis();
            if !expired {
                continue;
            }
            let Some(beams) = entry.beams.get() else {
                // Creation still pending; it will either fail and remove
                // itself or be drained on a later sweep.
                continue;
            };
            beams.begin_drain();
            if beams.in_flight() > 0 {
                debug!(segment = %key, in_flight = beams.in_flight(),
                       "segment draining, eviction deferred");
                continue;
            }
            beams.close();
            self.segments.lock().remove(&key);
            counter!("beamline.segments.evicted", 1);
            info!(segment = %key, "segment evicted");
            stats.evicted += 1;
        }

        if self.tuning.warming_period > Duration::ZERO {
            let horizon = now + chrono::Duration::milliseconds(self.tuning.warming_period_millis());
            let target = SegmentKey::containing(horizon, self.tuning.segment_granularity);
            let missing = target.start() > now && !self.segments.lock().contains_key(&target);
            if missing {
                match self.beams_for(target).await {
                    Ok(_) => {
                        info!(segment = %target, "segment pre-warmed");
                        stats.warmed += 1;
                    }
                    Err(err) => {
                        warn!(segment = %target, error = %err, "pre-warming failed");
                    }
                }
            }
        }

        stats
    }

    /// Spawn the periodic sweep, every quarter segment granularity
    /// (clamped to [1s, 5min]).
    pub fn spawn_maintenance(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = self;
        let period = (router.tuning.segment_granularity.as_duration() / 4)
            .clamp(Duration::from_secs(1), Duration::from_secs(300));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                router.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::retry::BackoffPolicy;
    use beamline_core::{ManualClock, SegmentGranularity};
    use beamline_discovery::{MemoryDirectory, TaskEndpoint};
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, h, mi, s).unwrap()
    }

    struct Harness {
        directory: Arc<MemoryDirectory>,
        transport: Arc<MemoryTransport>,
        clock: Arc<ManualClock>,
        router: Arc<BeamRouter>,
    }

    fn harness(tuning: ClusterTuning, tasks: usize) -> Harness {
        let directory = Arc::new(MemoryDirectory::new());
        for i in 0..tasks {
            directory.register(
                "overlord",
                TaskEndpoint::new(format!("t{}", i), format!("10.0.0.{}:8100", i)),
            );
        }
        let transport = Arc::new(MemoryTransport::new());
        let clock = Arc::new(ManualClock::new(utc(10, 1, 0)));
        let resolver = Arc::new(Resolver::new(directory.clone(), Duration::from_millis(200)));
        let policy = DeliveryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(5),
                multiplier: 2.0,
            },
            push_timeout: Duration::from_millis(500),
        };
        let router = Arc::new(BeamRouter::new(
            BackendLocation::new("overlord", "pageviews"),
            RollupSchema::default(),
            tuning,
            policy,
            resolver,
            transport.clone(),
            clock.clone(),
        ));
        Harness {
            directory,
            transport,
            clock,
            router,
        }
    }

    fn payload(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn routes_to_truncated_segment() {
        let h = harness(ClusterTuning::default(), 1);
        let receipt = h
            .router
            .route(utc(10, 0, 5), None, payload("a"))
            .await
            .unwrap();
        assert_eq!(
            receipt.segment,
            SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour)
        );
        assert_eq!(receipt.partition, 0);
        assert_eq!(h.transport.delivered(receipt.segment, 0).len(), 1);
    }

    #[tokio::test]
    async fn late_event_rejected_before_any_beam() {
        let h = harness(ClusterTuning::default(), 1);
        // now = 10:01; an event stamped 09:49 is 12 minutes old, 2 minutes
        // past the 10-minute window.
        let err = h
            .router
            .route(utc(9, 49, 0), None, payload("a"))
            .await
            .unwrap_err();
        match err {
            SendError::LateEvent { lateness_ms, .. } => assert_eq!(lateness_ms, 120_000),
            other => panic!("expected LateEvent, got {:?}", other),
        }
        assert_eq!(h.directory.lookup_count(), 0);
        assert_eq!(h.transport.push_attempts(), 0);
    }

    #[tokio::test]
    async fn lateness_boundary_is_inclusive() {
        let h = harness(ClusterTuning::default(), 1);
        // An event exactly window-period old sits on the boundary and is
        // still accepted; one millisecond more and it is late.
        h.clock.set(utc(10, 9, 59));
        h.router
            .route(utc(9, 59, 59), None, payload("a"))
            .await
            .unwrap();

        h.clock.advance(Duration::from_millis(1));
        let err = h
            .router
            .route(utc(9, 59, 59), None, payload("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::LateEvent { .. }));
    }

    #[tokio::test]
    async fn future_event_rejected_beyond_warming() {
        let tuning = ClusterTuning::builder()
            .warming_period(Duration::from_secs(300))
            .build()
            .unwrap();
        let h = harness(tuning, 1);

        // Next segment starts at 11:00; at 10:01 that is beyond the 5min
        // warming allowance.
        let err = h
            .router
            .route(utc(11, 30, 0), None, payload("a"))
            .await
            .unwrap_err();
        match err {
            SendError::FutureEvent { lead_ms, .. } => assert_eq!(lead_ms, 59 * 60_000),
            other => panic!("expected FutureEvent, got {:?}", other),
        }

        // At 10:56 the 11:00 segment is within warming and accepted.
        h.clock.set(utc(10, 56, 0));
        h.router
            .route(utc(11, 30, 0), None, payload("a"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_first_touch_creates_once() {
        let h = harness(ClusterTuning::default(), 2);

        let mut handles = Vec::new();
        for i in 0..16 {
            let router = h.router.clone();
            handles.push(tokio::spawn(async move {
                router
                    .route(utc(10, 0, 5), None, payload(&format!("e{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // One segment creation, one resolver lookup.
        assert_eq!(h.directory.lookup_count(), 1);
        assert_eq!(h.router.live_segments().len(), 1);
        let segment = SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour);
        assert_eq!(h.transport.delivered(segment, 0).len(), 16);
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_pending_entry() {
        let h = harness(ClusterTuning::default(), 0);

        let err = h
            .router
            .route(utc(10, 0, 5), None, payload("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::ResolutionTimeout { .. }));
        assert!(h.router.live_segments().is_empty());

        // Tasks announce; the same segment can now be created.
        h.directory
            .register("overlord", TaskEndpoint::new("t0", "10.0.0.1:8100"));
        h.router
            .route(utc(10, 0, 5), None, payload("b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn keyed_events_stick_to_one_partition() {
        let tuning = ClusterTuning::builder().partitions(4).build().unwrap();
        let h = harness(tuning, 4);

        let hash = 0xdead_beef_u64;
        let mut partitions = std::collections::HashSet::new();
        for i in 0..8 {
            let receipt = h
                .router
                .route(utc(10, 0, i), Some(hash), payload("a"))
                .await
                .unwrap();
            partitions.insert(receipt.partition);
        }
        assert_eq!(partitions.len(), 1);
    }

    #[tokio::test]
    async fn unkeyed_events_round_robin_partitions() {
        let tuning = ClusterTuning::builder().partitions(4).build().unwrap();
        let h = harness(tuning, 4);

        let mut partitions = std::collections::HashSet::new();
        for i in 0..4 {
            let receipt = h
                .router
                .route(utc(10, 0, i), None, payload("a"))
                .await
                .unwrap();
            partitions.insert(receipt.partition);
        }
        assert_eq!(partitions.len(), 4);
    }

    #[tokio::test]
    async fn replicant_failover_delivers_once() {
        let tuning = ClusterTuning::builder().replicants(2).build().unwrap();
        let h = harness(tuning, 2);

        // Whichever replicant is tried first, t0 being dead must not lose
        // the event: the other replicant (t1) takes it.
        h.transport.set_unreachable("t0", true);
        let segment = SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour);

        h.router
            .route(utc(10, 0, 5), None, payload("a"))
            .await
            .unwrap();
        let delivered = h.transport.delivered(segment, 0);
        assert_eq!(delivered.len(), 1);
        for push in h.transport.pushes() {
            assert_eq!(push.endpoint, "t1");
        }
    }

    #[tokio::test]
    async fn sweep_evicts_expired_segment_then_late() {
        let h = harness(ClusterTuning::default(), 1);
        let segment = SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour);

        h.router
            .route(utc(10, 0, 5), None, payload("a"))
            .await
            .unwrap();
        assert_eq!(h.router.live_segments(), vec![segment]);

        // Within the window nothing is evicted.
        h.clock.set(utc(11, 5, 0));
        assert_eq!(h.router.sweep().await.evicted, 0);
        assert_eq!(h.router.live_segments(), vec![segment]);

        // Past end + window the segment goes in one sweep.
        h.clock.set(utc(11, 10, 1));
        let stats = h.router.sweep().await;
        assert_eq!(stats.evicted, 1);
        assert!(h.router.live_segments().is_empty());

        let err = h
            .router
            .route(utc(10, 0, 5), None, payload("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::LateEvent { .. }));
    }

    #[tokio::test]
    async fn sweep_prewarms_upcoming_segment() {
        let tuning = ClusterTuning::builder()
            .warming_period(Duration::from_secs(600))
            .build()
            .unwrap();
        let h = harness(tuning, 1);

        // At 10:01 the warming horizon (10:11) is still inside the current
        // segment: nothing to do.
        assert_eq!(h.router.sweep().await.warmed, 0);

        // At 10:55 the horizon reaches into [11:00,12:00).
        h.clock.set(utc(10, 55, 0));
        let stats = h.router.sweep().await;
        assert_eq!(stats.warmed, 1);
        let next = SegmentKey::containing(utc(11, 0, 0), SegmentGranularity::Hour);
        assert_eq!(h.router.live_segments(), vec![next]);
        // The pre-created beam set has been opened on the backend.
        assert!(!h.transport.opens().is_empty());

        // A second sweep does not re-create it.
        assert_eq!(h.router.sweep().await.warmed, 0);
    }

    #[tokio::test]
    async fn segment_closed_by_backend_fails_stragglers() {
        let h = harness(ClusterTuning::default(), 1);
        let segment = SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour);

        h.router
            .route(utc(10, 0, 5), None, payload("a"))
            .await
            .unwrap();
        h.transport.close_segment(segment);

        let err = h
            .router
            .route(utc(10, 0, 6), None, payload("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::LateEvent { .. }));
    }
}

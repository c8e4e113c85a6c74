use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use beamline_beam::BeamRouter;
use beamline_core::{
    EventSerializer, Partitioner, SegmentKey, SendError, SendReceipt, SendResult, Timestamper,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What `send` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait for a queue slot; the caller's `send` suspends.
    #[default]
    Block,
    /// Resolve the future immediately with `OverCapacity`.
    FailFast,
}

/// Facade-level knobs; the delivery-side knobs live in
/// [`beamline_beam::DeliveryPolicy`] and [`beamline_core::ClusterTuning`].
#[derive(Debug, Clone)]
pub struct TranquilizerConfig {
    /// Total queued-event budget, split across workers.
    pub queue_capacity: usize,
    /// Concurrent dispatch workers. Events are routed to workers by
    /// partition hash, so one worker owns a given partition key.
    pub workers: usize,
    /// Largest batch a worker drains from its queue in one pass.
    pub max_batch_size: usize,
    pub backpressure: BackpressurePolicy,
    /// How long `stop` waits for in-flight work before force-failing it.
    pub stop_deadline: Duration,
}

impl Default for TranquilizerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8_192,
            workers: 4,
            max_batch_size: 128,
            backpressure: BackpressurePolicy::Block,
            stop_deadline: Duration::from_secs(30),
        }
    }
}

/// Resolves to the event's delivery outcome.
///
/// Dropping the future before the event is dispatched cancels it: the
/// worker skips events nobody is waiting on. Once dispatched, delivery
/// proceeds regardless. If the client shuts down first, the future
/// resolves to [`SendError::Shutdown`].
pub struct SendFuture {
    rx: oneshot::Receiver<SendResult>,
}

impl SendFuture {
    fn ready(result: SendResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for SendFuture {
    type Output = SendResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(result) => result,
            Err(_) => Err(SendError::Shutdown),
        })
    }
}

struct PendingSend {
    timestamp: DateTime<Utc>,
    partition_hash: Option<u64>,
    payload: Bytes,
    promise: oneshot::Sender<SendResult>,
}

enum State {
    Idle,
    Running(Running),
    Stopped,
}

struct Running {
    senders: Vec<mpsc::Sender<PendingSend>>,
    workers: Vec<JoinHandle<()>>,
    maintenance: JoinHandle<()>,
}

struct Inner<T: ?Sized> {
    router: Arc<BeamRouter>,
    config: TranquilizerConfig,
    state: Mutex<State>,
    worker_cursor: AtomicUsize,
    timestamper: Arc<dyn Timestamper<T>>,
    serializer: Arc<dyn EventSerializer<T>>,
    partitioner: Option<Arc<dyn Partitioner<T>>>,
}

/// The caller-facing async delivery client.
///
/// `start` spawns the worker pool and segment maintenance; `send` queues
/// one event and returns a future for its outcome; `stop` drains
/// in-flight work up to a deadline, then force-fails the rest. Cloning is
/// cheap and clones share the same client.
pub struct Tranquilizer<T: ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: ?Sized> Clone for Tranquilizer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Tranquilizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tranquilizer").finish_non_exhaustive()
    }
}

impl<T> Tranquilizer<T> {
    /// Start assembling a client; see [`TranquilizerBuilder`].
    ///
    /// [`TranquilizerBuilder`]: crate::TranquilizerBuilder
    pub fn builder(
        timestamper: impl Timestamper<T> + 'static,
    ) -> crate::builder::TranquilizerBuilder<T> {
        crate::builder::TranquilizerBuilder::new(timestamper)
    }

    pub(crate) fn from_parts(
        router: Arc<BeamRouter>,
        config: TranquilizerConfig,
        timestamper: Arc<dyn Timestamper<T>>,
        serializer: Arc<dyn EventSerializer<T>>,
        partitioner: Option<Arc<dyn Partitioner<T>>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                router,
                config,
                state: Mutex::new(State::Idle),
                worker_cursor: AtomicUsize::new(0),
                timestamper,
                serializer,
                partitioner,
            }),
        }
    }

    /// The router underneath, mainly for tests and operational tooling.
    pub fn router(&self) -> &Arc<BeamRouter> {
        &self.inner.router
    }

    /// Spawn the worker pool and the segment maintenance sweep.
    ///
    /// Must run inside a tokio runtime. Idempotent while running; a
    /// stopped client stays stopped.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        match &*state {
            State::Running(_) | State::Stopped => return,
            State::Idle => {}
        }

        let workers = self.inner.config.workers.max(1);
        let per_worker = (self.inner.config.queue_capacity / workers).max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(per_worker);
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                self.inner.router.clone(),
                rx,
                self.inner.config.max_batch_size.max(1),
            )));
        }
        let maintenance = self.inner.router.clone().spawn_maintenance();

        info!(workers, per_worker_capacity = per_worker, "tranquilizer started");
        *state = State::Running(Running {
            senders,
            workers: handles,
            maintenance,
        });
    }

    /// Queue one event for delivery.
    ///
    /// Suspends only on backpressure under the `Block` policy; the
    /// returned future resolves once the event is acknowledged or
    /// definitively failed. When a partitioner is installed, events with
    /// the same partition key go through the same worker and partition,
    /// so their relative order is preserved up to replicant failover;
    /// without one there is no ordering guarantee.
    pub async fn send(&self, event: &T) -> SendFuture {
        let timestamp = self.inner.timestamper.timestamp(event);
        let partition_hash = self
            .inner
            .partitioner
            .as_ref()
            .map(|p| p.partition_hash(event));
        let payload = match self.inner.serializer.serialize(event) {
            Ok(payload) => payload,
            Err(err) => {
                return SendFuture::ready(Err(SendError::Serialization {
                    message: err.message,
                }))
            }
        };
        counter!("beamline.client.sends", 1);

        let sender = {
            let state = self.inner.state.lock();
            match &*state {
                State::Running(running) => {
                    let worker = match partition_hash {
                        Some(hash) => (hash % running.senders.len() as u64) as usize,
                        None => {
                            self.inner.worker_cursor.fetch_add(1, Ordering::Relaxed)
                                % running.senders.len()
                        }
                    };
                    running.senders[worker].clone()
                }
                _ => return SendFuture::ready(Err(SendError::Shutdown)),
            }
        };

        let (tx, rx) = oneshot::channel();
        let pending = PendingSend {
            timestamp,
            partition_hash,
            payload,
            promise: tx,
        };

        match self.inner.config.backpressure {
            BackpressurePolicy::Block => {
                if sender.send(pending).await.is_err() {
                    return SendFuture::ready(Err(SendError::Shutdown));
                }
            }
            BackpressurePolicy::FailFast => match sender.try_send(pending) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!("beamline.client.over_capacity", 1);
                    return SendFuture::ready(Err(SendError::OverCapacity {
                        capacity: self.inner.config.queue_capacity,
                    }));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return SendFuture::ready(Err(SendError::Shutdown))
                }
            },
        }

        SendFuture { rx }
    }

    /// Stop accepting events and drain in-flight work.
    ///
    /// Waits up to the configured stop deadline for workers to finish,
    /// then aborts them; every still-unresolved future settles with
    /// [`SendError::Shutdown`] before this returns. Idempotent.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => running,
                _ => return,
            }
        };

        let Running {
            senders,
            workers,
            maintenance,
        } = running;
        // Closing the channels lets workers drain what is queued and exit.
        drop(senders);
        info!(workers = workers.len(), "tranquilizer stopping, draining workers");

        let deadline = Instant::now() + self.inner.config.stop_deadline;
        for mut handle in workers {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("stop deadline exceeded, force-failing remaining work");
                counter!("beamline.client.forced_shutdowns", 1);
                handle.abort();
                // Wait for the abort so queued promises are dropped (and
                // thus resolved to Shutdown) before we return.
                let _ = handle.await;
            }
        }
        maintenance.abort();
        info!("tranquilizer stopped");
    }
}

async fn worker_loop(
    router: Arc<BeamRouter>,
    mut rx: mpsc::Receiver<PendingSend>,
    max_batch: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(max_batch);
        batch.push(first);
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(pending) => batch.push(pending),
                Err(_) => break,
            }
        }
        histogram!("beamline.client.batch_size", batch.len() as f64);
        dispatch(&router, batch).await;
    }
}

/// Route one drained batch: window-check each event, group survivors by
/// (segment, partition), deliver each group, and settle every promise.
async fn dispatch(router: &BeamRouter, batch: Vec<PendingSend>) {
    let mut groups: HashMap<(SegmentKey, usize), Vec<PendingSend>> = HashMap::new();

    for pending in batch {
        if pending.promise.is_closed() {
            // Caller dropped the future before dispatch: cancelled.
            counter!("beamline.client.cancelled", 1);
            continue;
        }
        match router.check_segment(pending.timestamp) {
            Ok(segment) => {
                let partition = router.partition_for(pending.partition_hash);
                groups.entry((segment, partition)).or_default().push(pending);
            }
            Err(err) => {
                let _ = pending.promise.send(Err(err));
            }
        }
    }

    for ((segment, partition), group) in groups {
        let payloads: Vec<Bytes> = group.iter().map(|p| p.payload.clone()).collect();
        match router.deliver(segment, partition, &payloads).await {
            Ok(_) => {
                counter!("beamline.client.delivered", group.len() as u64);
                for pending in group {
                    let _ = pending.promise.send(Ok(SendReceipt { segment, partition }));
                }
            }
            Err(err) => {
                counter!("beamline.client.failed", group.len() as u64);
                for pending in group {
                    let _ = pending.promise.send(Err(err.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_beam::{BackoffPolicy, DeliveryPolicy, MemoryTransport};
    use beamline_core::{
        BackendLocation, ClusterTuning, KeyPartitioner, ManualClock, SegmentGranularity,
        SerializeError,
    };
    use beamline_discovery::{MemoryDirectory, TaskEndpoint};
    use chrono::TimeZone;

    struct TestEvent {
        at: DateTime<Utc>,
        key: String,
        seq: usize,
    }

    struct RawSerializer;

    impl EventSerializer<TestEvent> for RawSerializer {
        fn serialize(&self, event: &TestEvent) -> Result<Bytes, SerializeError> {
            Ok(Bytes::from(format!("{}-{}", event.key, event.seq)))
        }
    }

    fn utc(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, h, mi, s).unwrap()
    }

    fn event(at: DateTime<Utc>, key: &str, seq: usize) -> TestEvent {
        TestEvent {
            at,
            key: key.into(),
            seq,
        }
    }

    struct Harness {
        directory: Arc<MemoryDirectory>,
        transport: Arc<MemoryTransport>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(tasks: usize) -> Self {
            let directory = Arc::new(MemoryDirectory::new());
            for i in 0..tasks {
                directory.register(
                    "overlord",
                    TaskEndpoint::new(format!("t{}", i), format!("10.0.0.{}:8100", i)),
                );
            }
            Self {
                directory,
                transport: Arc::new(MemoryTransport::new()),
                clock: Arc::new(ManualClock::new(utc(10, 1, 0))),
            }
        }

        fn client(&self, config: TranquilizerConfig) -> Tranquilizer<TestEvent> {
            self.client_with(config, ClusterTuning::default(), Duration::from_millis(300))
        }

        fn client_with(
            &self,
            config: TranquilizerConfig,
            tuning: ClusterTuning,
            resolution_timeout: Duration,
        ) -> Tranquilizer<TestEvent> {
            Tranquilizer::builder(|e: &TestEvent| e.at)
                .directory(self.directory.clone())
                .transport(self.transport.clone())
                .location(BackendLocation::new("overlord", "pageviews"))
                .serializer(RawSerializer)
                .partitioner(KeyPartitioner::new(|e: &TestEvent| e.key.clone()))
                .tuning(tuning)
                .delivery_policy(DeliveryPolicy {
                    max_attempts: 3,
                    backoff: BackoffPolicy {
                        initial: Duration::from_millis(1),
                        max: Duration::from_millis(5),
                        multiplier: 2.0,
                    },
                    push_timeout: Duration::from_millis(500),
                })
                .resolution_timeout(resolution_timeout)
                .clock(self.clock.clone())
                .config(config)
                .build()
                .expect("client builds")
        }
    }

    #[tokio::test]
    async fn sends_resolve_with_receipts() {
        let h = Harness::new(1);
        let client = h.client(TranquilizerConfig::default());
        client.start();

        let receipt = client.send(&event(utc(10, 0, 5), "a", 0)).await.await.unwrap();
        assert_eq!(
            receipt.segment,
            SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour)
        );
        assert_eq!(h.transport.delivered(receipt.segment, 0).len(), 1);

        client.stop().await;
    }

    #[tokio::test]
    async fn late_event_fails_through_the_facade() {
        let h = Harness::new(1);
        let client = h.client(TranquilizerConfig::default());
        client.start();

        let err = client
            .send(&event(utc(9, 49, 0), "a", 0))
            .await
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::LateEvent { .. }));

        client.stop().await;
    }

    #[tokio::test]
    async fn same_key_preserves_order() {
        let h = Harness::new(1);
        let client = h.client(TranquilizerConfig {
            workers: 4,
            ..TranquilizerConfig::default()
        });
        client.start();

        let mut futures = Vec::new();
        for seq in 0..32 {
            let key = if seq % 2 == 0 { "even" } else { "odd" };
            futures.push(client.send(&event(utc(10, 0, 5), key, seq)).await);
        }
        for f in futures {
            f.await.unwrap();
        }

        let segment = SegmentKey::containing(utc(10, 0, 5), SegmentGranularity::Hour);
        let delivered: Vec<String> = h
            .transport
            .delivered(segment, 0)
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();

        for key in ["even", "odd"] {
            let seqs: Vec<usize> = delivered
                .iter()
                .filter(|s| s.starts_with(key))
                .map(|s| s.rsplit('-').next().unwrap().parse().unwrap())
                .collect();
            let mut sorted = seqs.clone();
            sorted.sort_unstable();
            assert_eq!(seqs, sorted, "per-key order lost for {}", key);
        }

        client.stop().await;
    }

    #[tokio::test]
    async fn fail_fast_over_capacity() {
        let h = Harness::new(0); // no tasks: workers stall in resolution
        let client = h.client_with(
            TranquilizerConfig {
                queue_capacity: 1,
                workers: 1,
                backpressure: BackpressurePolicy::FailFast,
                ..TranquilizerConfig::default()
            },
            ClusterTuning::default(),
            Duration::from_millis(400),
        );
        client.start();

        // First send is picked up by the worker and stalls on resolution;
        // the second fills the queue slot; the third must fail fast.
        let f1 = client.send(&event(utc(10, 0, 5), "a", 0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let f2 = client.send(&event(utc(10, 0, 5), "a", 1)).await;
        let f3 = client.send(&event(utc(10, 0, 5), "a", 2)).await;

        let err = f3.await.unwrap_err();
        assert_eq!(err, SendError::OverCapacity { capacity: 1 });

        // The stalled sends eventually fail with a resolution timeout.
        assert!(matches!(
            f1.await.unwrap_err(),
            SendError::ResolutionTimeout { .. }
        ));
        assert!(matches!(
            f2.await.unwrap_err(),
            SendError::ResolutionTimeout { .. }
        ));

        client.stop().await;
    }

    #[tokio::test]
    async fn block_policy_waits_for_capacity() {
        let h = Harness::new(0);
        let client = h.client_with(
            TranquilizerConfig {
                queue_capacity: 1,
                workers: 1,
                backpressure: BackpressurePolicy::Block,
                ..TranquilizerConfig::default()
            },
            ClusterTuning::default(),
            Duration::from_millis(100),
        );
        client.start();

        let f1 = client.send(&event(utc(10, 0, 5), "a", 0)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let f2 = client.send(&event(utc(10, 0, 5), "a", 1)).await;
        // This send blocks until the worker frees a slot, then enqueues.
        let f3 = client.send(&event(utc(10, 0, 5), "a", 2)).await;

        for f in [f1, f2, f3] {
            assert!(matches!(
                f.await.unwrap_err(),
                SendError::ResolutionTimeout { .. }
            ));
        }

        client.stop().await;
    }

    #[tokio::test]
    async fn stop_force_fails_stuck_work() {
        let h = Harness::new(0); // resolution never succeeds
        let client = h.client_with(
            TranquilizerConfig {
                stop_deadline: Duration::from_millis(50),
                workers: 1,
                ..TranquilizerConfig::default()
            },
            ClusterTuning::default(),
            Duration::from_secs(30),
        );
        client.start();

        let stuck = client.send(&event(utc(10, 0, 5), "a", 0)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.stop().await;
        assert_eq!(stuck.await.unwrap_err(), SendError::Shutdown);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_intake() {
        let h = Harness::new(1);
        let client = h.client(TranquilizerConfig::default());
        client.start();
        client.stop().await;
        client.stop().await;

        let err = client
            .send(&event(utc(10, 0, 5), "a", 0))
            .await
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Shutdown);

        // A stopped client cannot be restarted into a half-torn-down state.
        client.start();
        let err = client
            .send(&event(utc(10, 0, 5), "a", 1))
            .await
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Shutdown);
    }

    #[tokio::test]
    async fn dropped_future_cancels_before_dispatch() {
        let h = Harness::new(0);
        let client = h.client_with(
            TranquilizerConfig {
                workers: 1,
                ..TranquilizerConfig::default()
            },
            ClusterTuning::default(),
            Duration::from_millis(200),
        );
        client.start();

        // Occupy the worker so the next event sits in the queue.
        let f1 = client.send(&event(utc(10, 0, 5), "a", 0)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let f2 = client.send(&event(utc(10, 0, 5), "a", 1)).await;
        drop(f2);

        let _ = f1.await;
        // Give the worker time to drain the cancelled event.
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Only the first event ever produced a push attempt cycle; the
        // cancelled one never reached delivery (no additional resolution
        // wait would have been observable anyway, so assert via pushes).
        assert_eq!(h.transport.push_attempts(), 0);

        client.stop().await;
    }
}

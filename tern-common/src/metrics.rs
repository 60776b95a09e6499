//! Per-thread metrics repositories with bounded-overhead sampling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::config::ClusterConfig;
use crate::ids::{PartitionId, ReplicaId, TxnId};

/// Lifecycle points a transaction passes through inside one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionEvent {
    /// Accepted by the server submit path.
    EnterServer,
    /// Popped from an ordered log by the scheduler.
    EnterScheduler,
    /// Declared ready and handed to a worker channel.
    Dispatched,
    /// Picked up by a worker thread.
    EnterWorker,
    /// Finished execution on the worker.
    ExitWorker,
    /// Released and forwarded to the server output.
    ReturnToServer,
}

const NUM_TXN_EVENTS: usize = 6;

const SAMPLE_MASK_SIZE: usize = 256;

/// Decides, per event stream, which recordings are kept.
///
/// The mask holds `sample_rate` set bits out of 256, Fisher-Yates shuffled once at
/// construction, so sampling stays unbiased without per-record randomness.
#[derive(Debug, Clone)]
pub struct Sampler {
    mask: [bool; SAMPLE_MASK_SIZE],
    counts: Vec<u8>,
}

impl Sampler {
    /// Builds a sampler for `num_streams` independent event streams.
    #[must_use]
    pub fn new(sample_rate: u8, num_streams: usize) -> Self {
        let mut mask = [false; SAMPLE_MASK_SIZE];
        for slot in mask.iter_mut().take(sample_rate as usize) {
            *slot = true;
        }
        mask.shuffle(&mut rand::thread_rng());
        Self {
            mask,
            counts: vec![0; num_streams],
        }
    }

    /// Returns whether the next recording on `stream` should be kept.
    pub fn is_chosen(&mut self, stream: usize) -> bool {
        let count = &mut self.counts[stream];
        let chosen = self.mask[usize::from(*count)];
        *count = count.wrapping_add(1);
        chosen
    }
}

/// One sampled transaction lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxnEventSample {
    /// Nanoseconds since the Unix epoch.
    pub time_ns: i64,
    /// Replica the sample was taken on.
    pub replica: ReplicaId,
    /// Partition the sample was taken on.
    pub partition: PartitionId,
    /// Transaction the event belongs to.
    pub txn_id: TxnId,
    /// Lifecycle point reached.
    pub event: TransactionEvent,
}

/// One sampled deadlock-resolver pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverRunSample {
    /// Nanoseconds since the Unix epoch.
    pub time_ns: i64,
    /// Replica the sample was taken on.
    pub replica: ReplicaId,
    /// Partition the sample was taken on.
    pub partition: PartitionId,
    /// Wall time of the pass in nanoseconds.
    pub runtime_ns: i64,
    /// Number of graph nodes in unstable components.
    pub unstable_graph_sz: usize,
    /// Number of graph nodes in stable components.
    pub stable_graph_sz: usize,
    /// Number of stable components rewritten during the pass.
    pub deadlocks_resolved: usize,
}

/// One sampled resolved deadlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockSample {
    /// Nanoseconds since the Unix epoch.
    pub time_ns: i64,
    /// Replica the sample was taken on.
    pub replica: ReplicaId,
    /// Partition the sample was taken on.
    pub partition: PartitionId,
    /// Number of transactions in the resolved component.
    pub num_vertices: usize,
    /// Wait-for edges removed by the rewrite.
    pub edges_removed: Vec<(TxnId, TxnId)>,
    /// Wait-for edges added by the rewrite.
    pub edges_added: Vec<(TxnId, TxnId)>,
}

#[derive(Debug)]
struct AllMetrics {
    txn_event_sampler: Sampler,
    resolver_sampler: Sampler,
    txn_events: Vec<TxnEventSample>,
    resolver_runs: Vec<ResolverRunSample>,
    deadlocks: Vec<DeadlockSample>,
}

impl AllMetrics {
    fn new(sample_rate: u8) -> Self {
        Self {
            txn_event_sampler: Sampler::new(sample_rate, NUM_TXN_EVENTS),
            resolver_sampler: Sampler::new(sample_rate, 2),
            txn_events: Vec::new(),
            resolver_runs: Vec::new(),
            deadlocks: Vec::new(),
        }
    }
}

/// Metrics sink owned by one thread.
///
/// Recording locks a thread-private mutex, so contention is limited to the
/// aggregation path.
#[derive(Debug)]
pub struct MetricsRepository {
    replica: ReplicaId,
    partition: PartitionId,
    sample_rate: u8,
    inner: Mutex<AllMetrics>,
}

impl MetricsRepository {
    fn new(replica: ReplicaId, partition: PartitionId, sample_rate: u8) -> Self {
        Self {
            replica,
            partition,
            sample_rate,
            inner: Mutex::new(AllMetrics::new(sample_rate)),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, AllMetrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one transaction lifecycle event, subject to sampling.
    pub fn record_txn_event(&self, txn_id: TxnId, event: TransactionEvent) {
        let mut metrics = self.guard();
        if metrics.txn_event_sampler.is_chosen(event as usize) {
            metrics.txn_events.push(TxnEventSample {
                time_ns: now_nanos(),
                replica: self.replica,
                partition: self.partition,
                txn_id,
                event,
            });
        }
    }

    /// Records one deadlock-resolver pass, subject to sampling.
    pub fn record_resolver_run(
        &self,
        runtime_ns: i64,
        unstable_graph_sz: usize,
        stable_graph_sz: usize,
        deadlocks_resolved: usize,
    ) {
        let mut metrics = self.guard();
        if metrics.resolver_sampler.is_chosen(0) {
            metrics.resolver_runs.push(ResolverRunSample {
                time_ns: now_nanos(),
                replica: self.replica,
                partition: self.partition,
                runtime_ns,
                unstable_graph_sz,
                stable_graph_sz,
                deadlocks_resolved,
            });
        }
    }

    /// Records one resolved deadlock, subject to sampling.
    pub fn record_deadlock(
        &self,
        num_vertices: usize,
        edges_removed: Vec<(TxnId, TxnId)>,
        edges_added: Vec<(TxnId, TxnId)>,
    ) {
        let mut metrics = self.guard();
        if metrics.resolver_sampler.is_chosen(1) {
            metrics.deadlocks.push(DeadlockSample {
                time_ns: now_nanos(),
                replica: self.replica,
                partition: self.partition,
                num_vertices,
                edges_removed,
                edges_added,
            });
        }
    }

    fn reset(&self) -> (Vec<TxnEventSample>, Vec<ResolverRunSample>, Vec<DeadlockSample>) {
        let mut metrics = self.guard();
        let drained = std::mem::replace(&mut *metrics, AllMetrics::new(self.sample_rate));
        (drained.txn_events, drained.resolver_runs, drained.deadlocks)
    }
}

/// Aggregated point-in-time view over every registered thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Sampled transaction lifecycle events.
    pub txn_events: Vec<TxnEventSample>,
    /// Sampled resolver passes.
    pub resolver_runs: Vec<ResolverRunSample>,
    /// Sampled resolved deadlocks.
    pub deadlocks: Vec<DeadlockSample>,
}

/// Registers per-thread repositories and aggregates their samples.
#[derive(Debug)]
pub struct MetricsRepositoryManager {
    replica: ReplicaId,
    partition: PartitionId,
    sample_rate: u8,
    repos: Mutex<HashMap<ThreadId, Arc<MetricsRepository>>>,
}

impl MetricsRepositoryManager {
    /// Creates a manager scoped to this process's replica/partition coordinates.
    #[must_use]
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            replica: config.local_replica,
            partition: config.local_partition,
            sample_rate: config.sample_rate,
            repos: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the repository for the calling thread, creating it on first use.
    #[must_use]
    pub fn register_current_thread(&self) -> Arc<MetricsRepository> {
        let mut repos = self.repos.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(repos.entry(std::thread::current().id()).or_insert_with(|| {
            Arc::new(MetricsRepository::new(
                self.replica,
                self.partition,
                self.sample_rate,
            ))
        }))
    }

    /// Drains every registered repository into one combined snapshot.
    #[must_use]
    pub fn aggregate(&self) -> MetricsSnapshot {
        let repos = self.repos.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = MetricsSnapshot::default();
        for repo in repos.values() {
            let (events, runs, deadlocks) = repo.reset();
            snapshot.txn_events.extend(events);
            snapshot.resolver_runs.extend(runs);
            snapshot.deadlocks.extend(deadlocks);
        }
        snapshot
    }
}

/// Fixed-window rolling mean, used for ping deviation tracking.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: std::collections::VecDeque<i64>,
    sum: i64,
}

impl MovingAverage {
    /// Creates an average over the last `window` samples.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: std::collections::VecDeque::new(),
            sum: 0,
        }
    }

    /// Adds one sample, evicting the oldest when the window is full.
    pub fn add(&mut self, sample: i64) {
        self.samples.push_back(sample);
        self.sum += sample;
        if self.samples.len() > self.window
            && let Some(evicted) = self.samples.pop_front()
        {
            self.sum -= evicted;
        }
    }

    /// Returns the current mean, or zero before any sample arrives.
    #[must_use]
    pub fn avg(&self) -> i64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.sum / self.samples.len() as i64
    }
}

/// Nanoseconds since the Unix epoch as a signed 64-bit value.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
}

//! Process composition root for `tern-server`.
//!
//! Wires storage, the scheduler (with its resolver and worker pool), and the metrics
//! manager into one partition process, and provides the client-facing submit path:
//! validation, transaction-id allocation, master-metadata fill, and the multi-home
//! fragment fan-out that the upstream sequencer performs in a full deployment.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::debug;

use tern_common::config::ClusterConfig;
use tern_common::error::{TernError, TernResult};
use tern_common::ids::{Key, MasterInfo, ReplicaId, SlotId, TxnId, Value};
use tern_common::metrics::{
    MetricsRepository, MetricsRepositoryManager, TransactionEvent, now_nanos,
};
use tern_core::envelope::{Envelope, Request, Response};
use tern_core::partitioning::Partitioner;
use tern_core::txn::{RemasterSpec, Transaction, TxnType};
use tern_scheduler::scheduler::{Scheduler, SchedulerHandle, SchedulerInput};
use tern_storage::{MemStorage, Storage};

/// One client transaction request, before ids and metadata are attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnRequest {
    /// Keys to read.
    pub read_set: Vec<Key>,
    /// Keys to write with their new values.
    pub write_set: Vec<(Key, Value)>,
    /// When set, the request is a remaster of the single written key to this replica.
    pub new_master: Option<ReplicaId>,
}

/// Partition process composition.
///
/// The fields mirror the major subsystem boundaries so tests and the binary share one
/// topology: storage below, scheduler in the middle, submit/poll surfaces on top.
pub struct PartitionApp {
    /// Runtime configuration.
    pub config: ClusterConfig,
    /// Partition-local record store shared with the workers.
    pub storage: Arc<MemStorage>,
    /// Metrics registry shared by every thread of the process.
    pub metrics: Arc<MetricsRepositoryManager>,
    scheduler: SchedulerHandle,
    scheduler_inputs: mpsc::Sender<SchedulerInput>,
    outputs: mpsc::Receiver<Response>,
    partitioner: Partitioner,
    server_metrics: Arc<MetricsRepository>,
    txn_id_counter: u64,
    /// Next slot per replica stream; the stand-in for the sequencer's batch numbering.
    next_slots: Vec<SlotId>,
    /// Next slot of the multi-home ordering stream.
    next_mh_slot: SlotId,
}

impl PartitionApp {
    /// Creates and starts a partition process from runtime config.
    ///
    /// # Errors
    ///
    /// Returns `TernError::InvalidConfig` when `config` fails validation.
    pub fn new(config: ClusterConfig) -> TernResult<Self> {
        config.validate()?;
        let storage = Arc::new(MemStorage::new());
        let metrics = Arc::new(MetricsRepositoryManager::new(&config));
        let (output_sender, outputs) = mpsc::channel::<Response>();
        let scheduler = Scheduler::start(
            &config,
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::clone(&metrics),
            output_sender,
        )?;
        let scheduler_inputs = scheduler.sender();
        let partitioner = Partitioner::new(&config);
        let server_metrics = metrics.register_current_thread();
        let next_slots = vec![0; config.num_replicas as usize];
        Ok(Self {
            config,
            storage,
            metrics,
            scheduler,
            scheduler_inputs,
            outputs,
            partitioner,
            server_metrics,
            txn_id_counter: 0,
            next_slots,
            next_mh_slot: 0,
        })
    }

    /// Human-readable startup summary.
    #[must_use]
    pub fn startup_summary(&self) -> String {
        format!(
            "tern-server bootstrap: replica={}/{}, partition={}/{}, workers={}, ddr_interval={:?}, partitioning={:?}",
            self.config.local_replica,
            self.config.num_replicas,
            self.config.local_partition,
            self.config.num_partitions,
            self.config.num_workers.get(),
            self.config.ddr_interval,
            self.config.partitioning,
        )
    }

    /// Validates one client request, sequences it, and forwards it to the scheduler.
    ///
    /// Multi-home transactions fan out here: the coordinator copy goes through the
    /// multi-home stream and one lock-only fragment is emitted per involved replica.
    ///
    /// # Errors
    ///
    /// Returns `TernError::InvalidTransaction` when the request names no keys, a key
    /// outside the local partition, or a malformed remaster.
    pub fn submit(&mut self, request: TxnRequest) -> TernResult<TxnId> {
        self.validate(&request)?;
        let txn_id = self.next_txn_id();
        self.server_metrics
            .record_txn_event(txn_id, TransactionEvent::EnterServer);

        let metadata = self.resolve_master_metadata(&request);
        if let Some(new_master) = request.new_master {
            self.submit_remaster(txn_id, &request, &metadata, new_master)?;
            return Ok(txn_id);
        }

        let mut masters: Vec<ReplicaId> = metadata.values().map(|info| info.master).collect();
        masters.sort_unstable();
        masters.dedup();
        if let [home] = masters[..] {
            let txn = build_txn(txn_id, TxnType::SingleHome, Some(home), &request, &metadata);
            self.forward_to_replica(home, txn)?;
        } else {
            debug!(txn_id, homes = masters.len(), "fanning out multi-home txn");
            let coordinator =
                build_txn(txn_id, TxnType::MultiHomeOrLockOnly, None, &request, &metadata);
            self.forward_to_mh_stream(coordinator)?;
            for &home in &masters {
                let fragment = build_fragment(txn_id, home, &request, &metadata);
                self.forward_to_replica(home, fragment)?;
            }
        }
        Ok(txn_id)
    }

    /// Receives the next response from the scheduler, if one arrives in time.
    #[must_use]
    pub fn recv_response(&self, timeout: Duration) -> Option<Response> {
        self.outputs.recv_timeout(timeout).ok()
    }

    /// Waits for the next completed transaction, skipping unrelated responses.
    #[must_use]
    pub fn next_completed(&self, timeout: Duration) -> Option<Box<Transaction>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.outputs.recv_timeout(remaining) {
                Ok(Response::Completed { txn }) => return Some(txn),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Requests a stats dump; the reply arrives on the response channel.
    ///
    /// # Errors
    ///
    /// Returns `TernError::ChannelClosed` when the scheduler has stopped.
    pub fn request_stats(&self, level: u32) -> TernResult<()> {
        self.send_envelope(Request::Stats { level })
    }

    /// Sends a latency probe; the pong arrives on the response channel.
    ///
    /// # Errors
    ///
    /// Returns `TernError::ChannelClosed` when the scheduler has stopped.
    pub fn send_ping(&self) -> TernResult<()> {
        self.send_envelope(Request::Ping {
            src_send_time: now_nanos(),
            dst: self.config.local_machine_id(),
        })
    }

    /// Requests one deadlock-resolver pass ahead of its timer.
    pub fn trigger_resolver(&self) {
        self.scheduler.trigger_resolver();
    }

    /// Stops the scheduler, resolver, and workers.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    fn validate(&self, request: &TxnRequest) -> TernResult<()> {
        if request.read_set.is_empty() && request.write_set.is_empty() {
            return Err(TernError::InvalidTransaction("transaction touches no keys"));
        }
        if request.new_master.is_some()
            && (request.write_set.len() != 1 || !request.read_set.is_empty())
        {
            return Err(TernError::InvalidTransaction(
                "remaster must name exactly one written key",
            ));
        }
        for key in self.request_keys(request) {
            if !self.partitioner.key_is_in_local_partition(key) {
                return Err(TernError::InvalidTransaction(
                    "key is outside the local partition",
                ));
            }
        }
        Ok(())
    }

    fn request_keys<'a>(&self, request: &'a TxnRequest) -> impl Iterator<Item = &'a Key> {
        request
            .read_set
            .iter()
            .chain(request.write_set.iter().map(|(key, _)| key))
    }

    fn resolve_master_metadata(&self, request: &TxnRequest) -> HashMap<Key, MasterInfo> {
        self.request_keys(request)
            .map(|key| {
                let info = self.storage.master_of(key).unwrap_or_else(|| {
                    MasterInfo::new(self.partitioner.default_master_of_key(key))
                });
                (key.clone(), info)
            })
            .collect()
    }

    fn submit_remaster(
        &mut self,
        txn_id: TxnId,
        request: &TxnRequest,
        metadata: &HashMap<Key, MasterInfo>,
        new_master: ReplicaId,
    ) -> TernResult<()> {
        if new_master >= self.config.num_replicas {
            return Err(TernError::InvalidTransaction(
                "remaster destination is outside the replica space",
            ));
        }
        let (key, _) = &request.write_set[0];
        let old_master = metadata
            .get(key)
            .map(|info| info.master)
            .unwrap_or_default();
        if old_master == new_master {
            return Err(TernError::InvalidTransaction(
                "remaster destination equals the current master",
            ));
        }

        let spec = RemasterSpec {
            new_master,
            is_new_master_lock_only: false,
        };
        let mut coordinator =
            build_txn(txn_id, TxnType::MultiHomeOrLockOnly, None, request, metadata);
        coordinator.remaster = Some(spec);
        self.forward_to_mh_stream(coordinator)?;

        let mut old_fragment =
            build_txn(txn_id, TxnType::MultiHomeOrLockOnly, Some(old_master), request, metadata);
        old_fragment.remaster = Some(spec);
        self.forward_to_replica(old_master, old_fragment)?;

        let mut new_fragment =
            build_txn(txn_id, TxnType::MultiHomeOrLockOnly, Some(new_master), request, metadata);
        new_fragment.remaster = Some(RemasterSpec {
            new_master,
            is_new_master_lock_only: true,
        });
        self.forward_to_replica(new_master, new_fragment)?;
        Ok(())
    }

    fn forward_to_replica(&mut self, replica: ReplicaId, txn: Transaction) -> TernResult<()> {
        let slot = self.next_slots[replica as usize];
        self.next_slots[replica as usize] += 1;
        self.forward(txn, slot)
    }

    fn forward_to_mh_stream(&mut self, txn: Transaction) -> TernResult<()> {
        let slot = self.next_mh_slot;
        self.next_mh_slot += 1;
        self.forward(txn, slot)
    }

    fn forward(&self, txn: Transaction, slot: SlotId) -> TernResult<()> {
        self.send_envelope(Request::ForwardTxn {
            txn: Box::new(txn),
            slot,
        })
    }

    fn send_envelope(&self, request: Request) -> TernResult<()> {
        self.scheduler_inputs
            .send(SchedulerInput::Envelope(Envelope {
                from: self.config.local_machine_id(),
                request,
            }))
            .map_err(|_| TernError::ChannelClosed("scheduler input"))
    }

    fn next_txn_id(&mut self) -> TxnId {
        self.txn_id_counter += 1;
        self.txn_id_counter * u64::from(self.config.num_machines())
            + u64::from(self.config.local_machine_id())
    }
}

impl Drop for PartitionApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_txn(
    txn_id: TxnId,
    txn_type: TxnType,
    home: Option<ReplicaId>,
    request: &TxnRequest,
    metadata: &HashMap<Key, MasterInfo>,
) -> Transaction {
    let mut txn = Transaction::new(txn_id, txn_type, home);
    for key in &request.read_set {
        let _ = txn.read_set.insert(key.clone(), Vec::new());
    }
    for (key, value) in &request.write_set {
        let _ = txn.write_set.insert(key.clone(), value.clone());
    }
    txn.internal.master_metadata = metadata.clone();
    txn
}

/// Builds the lock-only fragment of a multi-home transaction for one replica: the
/// subsets of the key sets and metadata mastered by `home`.
fn build_fragment(
    txn_id: TxnId,
    home: ReplicaId,
    request: &TxnRequest,
    metadata: &HashMap<Key, MasterInfo>,
) -> Transaction {
    let mut txn = Transaction::new(txn_id, TxnType::MultiHomeOrLockOnly, Some(home));
    for key in &request.read_set {
        if metadata.get(key).is_some_and(|info| info.master == home) {
            let _ = txn.read_set.insert(key.clone(), Vec::new());
        }
    }
    for (key, value) in &request.write_set {
        if metadata.get(key).is_some_and(|info| info.master == home) {
            let _ = txn.write_set.insert(key.clone(), value.clone());
        }
    }
    txn.internal.master_metadata = metadata
        .iter()
        .filter(|(_, info)| info.master == home)
        .map(|(key, info)| (key.clone(), *info))
        .collect();
    txn
}

/// Starts `tern-server` process bootstrap.
///
/// # Errors
///
/// Returns `TernError::InvalidConfig` when the default configuration fails
/// validation; scheduler startup errors are propagated as-is.
pub fn run() -> TernResult<()> {
    bootstrap::run_server()
}

mod bootstrap;

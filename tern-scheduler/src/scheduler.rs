//! Per-partition scheduler: ordered ingest, lock management, and dispatch.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, error, warn};

use tern_common::async_log::AsyncLog;
use tern_common::config::ClusterConfig;
use tern_common::error::TernResult;
use tern_common::ids::{MachineId, SlotId, TxnId};
use tern_common::metrics::{
    MetricsRepository, MetricsRepositoryManager, MetricsSnapshot, MovingAverage, TransactionEvent,
    now_nanos,
};
use tern_core::containers::HotMap;
use tern_core::envelope::{Envelope, Request, Response};
use tern_core::holder::TxnHolder;
use tern_core::partitioning::Partitioner;
use tern_core::txn::{Transaction, TxnType};
use tern_storage::Storage;

use crate::lock_manager::{AcquireLocksResult, DdrLockManager, LockManagerStats};
use crate::resolver::{DeadlockResolver, DeadlockResolverHandle};
use crate::worker::WorkerPool;

const PING_DEVIATION_WINDOW: usize = 100;

/// Messages delivered to the scheduler thread.
#[derive(Debug)]
pub enum SchedulerInput {
    /// An envelope from the server, the sequencer stand-in, or the resolver.
    Envelope(Envelope),
    /// A transaction a worker finished executing.
    WorkerDone(Box<Transaction>),
    /// Stop the scheduler loop.
    Shutdown,
}

/// Combined stats payload rendered for a [`Request::Stats`] request.
#[derive(Debug, Serialize)]
struct StatsDump {
    lock_manager: LockManagerStats,
    metrics: MetricsSnapshot,
}

/// The per-partition scheduler.
///
/// Consumes sequenced transactions from one ordered log per replica (plus one for the
/// multi-home stream), drives them through the DDR lock manager, and dispatches ready
/// transactions to the worker pool. Lock-only fragments of a multi-home transaction
/// join here: the coordinator copy is held in the active table until the lock manager
/// reports the transaction ready.
pub struct Scheduler {
    partitioner: Partitioner,
    lock_manager: DdrLockManager,
    /// One gap-intolerant log per replica for single-home txns and lock-only fragments.
    local_logs: Vec<AsyncLog<Box<Transaction>>>,
    /// Ordering stream for multi-home coordinator copies.
    mh_log: AsyncLog<Box<Transaction>>,
    /// Holds the dispatchable copy of every in-flight transaction.
    active_txns: HotMap<TxnId, TxnHolder>,
    workers: WorkerPool,
    /// Windowed clock deviation per peer machine, echoed in pongs.
    deviations: Vec<MovingAverage>,
    inputs: mpsc::Receiver<SchedulerInput>,
    outputs: mpsc::Sender<Response>,
    metrics_manager: Arc<MetricsRepositoryManager>,
    metrics: Arc<MetricsRepository>,
}

impl Scheduler {
    /// Creates a scheduler reading from `inputs`; worker completions are routed back
    /// through `input_sender`.
    #[must_use]
    pub fn new(
        config: &ClusterConfig,
        storage: Arc<dyn Storage>,
        metrics_manager: Arc<MetricsRepositoryManager>,
        inputs: mpsc::Receiver<SchedulerInput>,
        input_sender: mpsc::Sender<SchedulerInput>,
        outputs: mpsc::Sender<Response>,
    ) -> Self {
        let workers = WorkerPool::spawn(
            config,
            storage,
            input_sender,
            Arc::clone(&metrics_manager),
        );
        let metrics = metrics_manager.register_current_thread();
        Self {
            partitioner: Partitioner::new(config),
            lock_manager: DdrLockManager::new(),
            local_logs: (0..config.num_replicas).map(|_| AsyncLog::new(0)).collect(),
            mh_log: AsyncLog::new(0),
            active_txns: HotMap::default(),
            workers,
            deviations: (0..config.num_machines())
                .map(|_| MovingAverage::new(PING_DEVIATION_WINDOW))
                .collect(),
            inputs,
            outputs,
            metrics_manager,
            metrics,
        }
    }

    /// Starts the scheduler and its deadlock resolver on their own threads.
    ///
    /// # Errors
    ///
    /// Returns `TernError::InvalidConfig` when `config` fails validation.
    pub fn start(
        config: &ClusterConfig,
        storage: Arc<dyn Storage>,
        metrics_manager: Arc<MetricsRepositoryManager>,
        outputs: mpsc::Sender<Response>,
    ) -> TernResult<SchedulerHandle> {
        config.validate()?;
        let (input_sender, inputs) = mpsc::channel::<SchedulerInput>();
        let scheduler = Self::new(
            config,
            storage,
            metrics_manager.clone(),
            inputs,
            input_sender.clone(),
            outputs,
        );

        let resolver = DeadlockResolver::new(
            scheduler.lock_manager.shared(),
            input_sender.clone(),
            config,
            metrics_manager,
        );
        let resolver = DeadlockResolverHandle::spawn(resolver, config.ddr_interval);

        let worker = thread::Builder::new()
            .name("tern-scheduler".to_owned())
            .spawn(move || scheduler.run())
            .ok();
        Ok(SchedulerHandle {
            sender: input_sender,
            worker,
            resolver,
        })
    }

    /// Processes inputs until shutdown.
    pub fn run(mut self) {
        self.metrics = self.metrics_manager.register_current_thread();
        loop {
            let Ok(input) = self.inputs.recv() else {
                break;
            };
            if !self.handle_input(input) {
                break;
            }
        }
        debug!("scheduler loop stopped");
    }

    fn handle_input(&mut self, input: SchedulerInput) -> bool {
        match input {
            SchedulerInput::Envelope(envelope) => self.handle_envelope(envelope),
            SchedulerInput::WorkerDone(txn) => self.handle_completion(txn),
            SchedulerInput::Shutdown => return false,
        }
        true
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope.request {
            Request::ForwardTxn { txn, slot } => self.handle_forward(txn, slot),
            Request::Ping { src_send_time, dst } => {
                self.handle_ping(envelope.from, src_send_time, dst);
            }
            Request::Signal => self.drain_resolver_ready(),
            Request::Stats { level } => self.handle_stats(level),
        }
    }

    fn handle_forward(&mut self, txn: Box<Transaction>, slot: SlotId) {
        self.metrics
            .record_txn_event(txn.id(), TransactionEvent::EnterScheduler);
        let log = match txn.internal.home {
            None => &mut self.mh_log,
            Some(replica) => self
                .local_logs
                .get_mut(replica as usize)
                .unwrap_or_else(|| panic!("replica {replica} is outside the configured cluster")),
        };
        if let Err(insert_error) = log.insert(slot, txn) {
            error!(%insert_error, slot, "dropping out-of-contract log insertion");
            return;
        }
        self.drain_logs();
    }

    fn drain_logs(&mut self) {
        while self.mh_log.has_next() {
            let (_, txn) = self
                .mh_log
                .next()
                .unwrap_or_else(|error| panic!("multi-home log misreported readiness: {error}"));
            self.process_sequenced_txn(txn);
        }
        for replica in 0..self.local_logs.len() {
            while self.local_logs[replica].has_next() {
                let (_, txn) = self.local_logs[replica]
                    .next()
                    .unwrap_or_else(|error| panic!("local log misreported readiness: {error}"));
                self.process_sequenced_txn(txn);
            }
        }
    }

    fn process_sequenced_txn(&mut self, txn: Box<Transaction>) {
        let holder = match TxnHolder::new(&self.partitioner, txn) {
            Ok(holder) => holder,
            Err(holder_error) => {
                panic!("sequenced transaction failed holder construction: {holder_error}")
            }
        };
        let txn_id = holder.id();
        match (holder.txn().internal.txn_type, holder.txn().internal.home) {
            (TxnType::SingleHome, _) => {
                let outcome = self.lock_manager.accept_txn_and_acquire_locks(&holder);
                let _ = self.active_txns.insert(txn_id, holder);
                if outcome == AcquireLocksResult::Acquired {
                    self.dispatch(txn_id);
                }
            }
            (TxnType::MultiHomeOrLockOnly, None) => {
                let ready = self.lock_manager.accept_transaction(&holder);
                let _ = self.active_txns.insert(txn_id, holder);
                if ready {
                    self.dispatch(txn_id);
                }
            }
            (TxnType::MultiHomeOrLockOnly, Some(_)) => {
                // A lock-only fragment contributes its locks and is discarded; the
                // coordinator copy in the active table carries the payload.
                let outcome = self.lock_manager.acquire_locks(&holder);
                if outcome == AcquireLocksResult::Acquired {
                    self.dispatch(txn_id);
                }
            }
        }
    }

    fn dispatch(&mut self, txn_id: TxnId) {
        let holder = self
            .active_txns
            .remove(&txn_id)
            .unwrap_or_else(|| panic!("ready txn {txn_id} has no active record"));
        self.metrics
            .record_txn_event(txn_id, TransactionEvent::Dispatched);
        self.workers.dispatch(holder.into_txn());
    }

    fn handle_completion(&mut self, txn: Box<Transaction>) {
        let newly_ready = self.lock_manager.release_locks(&txn);
        self.metrics
            .record_txn_event(txn.id(), TransactionEvent::ReturnToServer);
        if self.outputs.send(Response::Completed { txn }).is_err() {
            warn!("output channel closed; dropping completed transaction");
        }
        for txn_id in newly_ready {
            self.dispatch(txn_id);
        }
    }

    fn drain_resolver_ready(&mut self) {
        for txn_id in self.lock_manager.get_ready_txns() {
            self.dispatch(txn_id);
        }
    }

    fn handle_ping(&mut self, from: MachineId, src_send_time: i64, dst: MachineId) {
        let deviation = now_nanos() - src_send_time;
        let dev = match self.deviations.get_mut(from as usize) {
            Some(average) => {
                average.add(deviation);
                average.avg()
            }
            None => 0,
        };
        let pong = Response::Pong {
            src_send_time,
            dev,
            dst,
        };
        if self.outputs.send(pong).is_err() {
            warn!("output channel closed; dropping pong");
        }
    }

    fn handle_stats(&mut self, level: u32) {
        let dump = StatsDump {
            lock_manager: self.lock_manager.stats(level),
            metrics: self.metrics_manager.aggregate(),
        };
        match serde_json::to_string(&dump) {
            Ok(json) => {
                if self.outputs.send(Response::Stats { json }).is_err() {
                    warn!("output channel closed; dropping stats");
                }
            }
            Err(serialize_error) => error!(%serialize_error, "stats serialization failed"),
        }
    }
}

/// Owns the scheduler and resolver threads.
#[derive(Debug)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerInput>,
    worker: Option<JoinHandle<()>>,
    resolver: DeadlockResolverHandle,
}

impl SchedulerHandle {
    /// Returns a sender for feeding the scheduler.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<SchedulerInput> {
        self.sender.clone()
    }

    /// Requests one resolver pass ahead of the timer.
    pub fn trigger_resolver(&self) {
        self.resolver.trigger();
    }

    /// Stops both threads and joins them.
    pub fn shutdown(&mut self) {
        self.resolver.shutdown();
        let _ = self.sender.send(SchedulerInput::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::{Scheduler, SchedulerInput};
    use tern_common::config::ClusterConfig;
    use tern_common::ids::{MasterInfo, TxnId};
    use tern_common::metrics::MetricsRepositoryManager;
    use tern_core::envelope::{Envelope, Request, Response};
    use tern_core::txn::{Transaction, TxnStatus, TxnType};
    use tern_storage::MemStorage;
    use googletest::prelude::*;
    use rstest::rstest;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn config() -> ClusterConfig {
        ClusterConfig {
            num_replicas: 2,
            num_partitions: 1,
            ..ClusterConfig::default()
        }
    }

    struct Fixture {
        handle: super::SchedulerHandle,
        outputs: mpsc::Receiver<Response>,
    }

    fn fixture() -> Fixture {
        let (output_tx, outputs) = mpsc::channel();
        let handle = Scheduler::start(
            &config(),
            Arc::new(MemStorage::new()),
            Arc::new(MetricsRepositoryManager::new(&config())),
            output_tx,
        )
        .expect("scheduler must start");
        Fixture { handle, outputs }
    }

    fn forward(fix: &Fixture, txn: Transaction, slot: u32) {
        fix.handle
            .sender()
            .send(SchedulerInput::Envelope(Envelope {
                from: 0,
                request: Request::ForwardTxn {
                    txn: Box::new(txn),
                    slot,
                },
            }))
            .expect("scheduler must accept envelopes");
    }

    fn single_home_write(id: TxnId, key: &[u8], value: &[u8], master: u32) -> Transaction {
        let mut txn = Transaction::new(id, TxnType::SingleHome, Some(master));
        let _ = txn.write_set.insert(key.to_vec(), value.to_vec());
        let _ = txn
            .internal
            .master_metadata
            .insert(key.to_vec(), MasterInfo::new(master));
        txn
    }

    fn completed_txn(fix: &Fixture) -> Box<Transaction> {
        loop {
            match fix
                .outputs
                .recv_timeout(RECV_TIMEOUT)
                .expect("a completion must arrive")
            {
                Response::Completed { txn } => return txn,
                _ => continue,
            }
        }
    }

    #[rstest]
    fn conflicting_transactions_complete_in_log_order() {
        let fix = fixture();
        forward(&fix, single_home_write(1, b"x", b"one", 0), 0);
        forward(&fix, single_home_write(2, b"x", b"two", 0), 1);

        let first = completed_txn(&fix);
        let second = completed_txn(&fix);
        assert_that!(first.id(), eq(1));
        assert_that!(second.id(), eq(2));
        assert_that!(first.status, eq(TxnStatus::Committed));
        assert_that!(second.status, eq(TxnStatus::Committed));
    }

    #[rstest]
    fn out_of_order_slots_are_reordered_before_processing() {
        let fix = fixture();
        // Slot 1 arrives first and must wait for slot 0.
        forward(&fix, single_home_write(2, b"x", b"two", 0), 1);
        forward(&fix, single_home_write(1, b"x", b"one", 0), 0);

        assert_that!(completed_txn(&fix).id(), eq(1));
        assert_that!(completed_txn(&fix).id(), eq(2));
    }

    #[rstest]
    fn replica_streams_are_ordered_independently() {
        let fix = fixture();
        // Non-conflicting writes on two replica streams; both must come through even
        // though each stream starts at slot 0.
        forward(&fix, single_home_write(1, b"a", b"r0", 0), 0);
        forward(&fix, single_home_write(2, b"b", b"r1", 1), 0);

        let mut seen = vec![completed_txn(&fix).id(), completed_txn(&fix).id()];
        seen.sort_unstable();
        assert_that!(&seen, eq(&vec![1, 2]));
    }

    #[rstest]
    fn multi_home_transaction_joins_its_fragments() {
        let fix = fixture();

        let mut coordinator = Transaction::new(5, TxnType::MultiHomeOrLockOnly, None);
        let _ = coordinator.write_set.insert(b"a".to_vec(), b"va".to_vec());
        let _ = coordinator.write_set.insert(b"b".to_vec(), b"vb".to_vec());
        let _ = coordinator
            .internal
            .master_metadata
            .insert(b"a".to_vec(), MasterInfo::new(0));
        let _ = coordinator
            .internal
            .master_metadata
            .insert(b"b".to_vec(), MasterInfo::new(1));

        let mut fragment_zero = Transaction::new(5, TxnType::MultiHomeOrLockOnly, Some(0));
        let _ = fragment_zero.write_set.insert(b"a".to_vec(), b"va".to_vec());
        let _ = fragment_zero
            .internal
            .master_metadata
            .insert(b"a".to_vec(), MasterInfo::new(0));

        let mut fragment_one = Transaction::new(5, TxnType::MultiHomeOrLockOnly, Some(1));
        let _ = fragment_one.write_set.insert(b"b".to_vec(), b"vb".to_vec());
        let _ = fragment_one
            .internal
            .master_metadata
            .insert(b"b".to_vec(), MasterInfo::new(1));

        forward(&fix, coordinator, 0);
        forward(&fix, fragment_zero, 0);
        forward(&fix, fragment_one, 0);

        let done = completed_txn(&fix);
        assert_that!(done.id(), eq(5));
        assert_that!(done.status, eq(TxnStatus::Committed));
    }

    #[rstest]
    fn ping_is_answered_with_a_pong() {
        let fix = fixture();
        fix.handle
            .sender()
            .send(SchedulerInput::Envelope(Envelope {
                from: 1,
                request: Request::Ping {
                    src_send_time: 123,
                    dst: 7,
                },
            }))
            .expect("scheduler must accept envelopes");

        let response = fix
            .outputs
            .recv_timeout(RECV_TIMEOUT)
            .expect("a pong must arrive");
        let Response::Pong {
            src_send_time, dst, ..
        } = response
        else {
            panic!("ping must produce a pong");
        };
        assert_that!(src_send_time, eq(123));
        assert_that!(dst, eq(7));
    }

    #[rstest]
    fn stats_request_produces_a_json_dump() {
        let fix = fixture();
        fix.handle
            .sender()
            .send(SchedulerInput::Envelope(Envelope {
                from: 0,
                request: Request::Stats { level: 2 },
            }))
            .expect("scheduler must accept envelopes");

        let response = fix
            .outputs
            .recv_timeout(RECV_TIMEOUT)
            .expect("stats must arrive");
        let Response::Stats { json } = response else {
            panic!("stats request must produce a stats response");
        };
        assert_that!(json.contains("lock_manager"), eq(true));
    }
}

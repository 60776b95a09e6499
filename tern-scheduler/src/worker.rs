//! Worker pool executing ready transactions.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{error, warn};

use tern_common::config::ClusterConfig;
use tern_common::ids::MasterInfo;
use tern_common::metrics::{MetricsRepositoryManager, TransactionEvent};
use tern_core::txn::{Transaction, TxnStatus};
use tern_storage::{Record, Storage};

use crate::scheduler::SchedulerInput;

/// Round-robin pool of worker threads.
///
/// Workers receive an owned transaction, execute it against storage, and send it back
/// to the scheduler, which releases its locks.
#[derive(Debug)]
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Box<Transaction>>>,
    handles: Vec<JoinHandle<()>>,
    next_worker: usize,
}

impl WorkerPool {
    /// Spawns `num_workers` threads executing against `storage`.
    #[must_use]
    pub fn spawn(
        config: &ClusterConfig,
        storage: Arc<dyn Storage>,
        completions: mpsc::Sender<SchedulerInput>,
        metrics: Arc<MetricsRepositoryManager>,
    ) -> Self {
        let num_workers = usize::from(config.num_workers.get());
        let return_dummy_txn = config.return_dummy_txn;
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let (sender, receiver) = mpsc::channel::<Box<Transaction>>();
            let storage = Arc::clone(&storage);
            let completions = completions.clone();
            let metrics = Arc::clone(&metrics);
            let handle = thread::Builder::new()
                .name(format!("tern-worker-{index}"))
                .spawn(move || {
                    worker_main(&receiver, &*storage, &completions, &metrics, return_dummy_txn);
                })
                .ok();
            senders.push(sender);
            if let Some(handle) = handle {
                handles.push(handle);
            }
        }
        Self {
            senders,
            handles,
            next_worker: 0,
        }
    }

    /// Hands one ready transaction to the next worker in rotation.
    pub fn dispatch(&mut self, txn: Box<Transaction>) {
        let index = self.next_worker % self.senders.len();
        self.next_worker = self.next_worker.wrapping_add(1);
        if self.senders[index].send(txn).is_err() {
            error!(worker = index, "worker channel closed; dropping transaction");
        }
    }

    /// Closes all worker channels and joins the threads.
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(
    receiver: &mpsc::Receiver<Box<Transaction>>,
    storage: &dyn Storage,
    completions: &mpsc::Sender<SchedulerInput>,
    metrics: &MetricsRepositoryManager,
    return_dummy_txn: bool,
) {
    let repo = metrics.register_current_thread();
    while let Ok(mut txn) = receiver.recv() {
        repo.record_txn_event(txn.id(), TransactionEvent::EnterWorker);
        execute(&mut txn, storage);
        repo.record_txn_event(txn.id(), TransactionEvent::ExitWorker);

        let outgoing = if return_dummy_txn { strip(txn) } else { txn };
        if completions.send(SchedulerInput::WorkerDone(outgoing)).is_err() {
            warn!("scheduler input channel closed; worker exiting");
            break;
        }
    }
}

/// Executes one transaction against storage and sets its final status.
pub fn execute(txn: &mut Transaction, storage: &dyn Storage) {
    // A transaction sequenced against a stale remaster counter must not touch
    // storage; the client retries against refreshed metadata. Unknown keys count as
    // counter zero.
    for (key, expected) in &txn.internal.master_metadata {
        let actual = storage.master_of(key).unwrap_or_default();
        if actual.counter != expected.counter {
            txn.abort("outdated counter");
            return;
        }
    }

    if let Some(remaster) = txn.remaster {
        let Some(key) = txn.write_set.keys().next().cloned() else {
            txn.abort("remaster without a key");
            return;
        };
        if storage.remaster(&key, remaster.new_master).is_none() {
            // First write under the new master also seeds the record.
            storage.write(
                key,
                Record {
                    value: Vec::new(),
                    metadata: MasterInfo {
                        master: remaster.new_master,
                        counter: 1,
                    },
                },
            );
        }
        txn.status = TxnStatus::Committed;
        return;
    }

    for (key, value) in &mut txn.read_set {
        if let Some(record) = storage.read(key) {
            *value = record.value;
        }
    }
    for (key, value) in &txn.write_set {
        let metadata = storage
            .master_of(key)
            .or_else(|| txn.internal.master_metadata.get(key).copied())
            .unwrap_or_default();
        storage.write(
            key.clone(),
            Record {
                value: value.clone(),
                metadata,
            },
        );
    }
    txn.status = TxnStatus::Committed;
}

fn strip(mut txn: Box<Transaction>) -> Box<Transaction> {
    txn.read_set.clear();
    txn.write_set.clear();
    txn.internal.master_metadata.clear();
    txn
}

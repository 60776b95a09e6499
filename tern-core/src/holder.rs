//! Partition-local views derived from a transaction.
//!
//! The scheduler consults the same derived data (local lock set, involved replicas,
//! partition fan-out) several times per transaction, so it is computed once up front
//! and carried next to the transaction instead of being recomputed per lookup.

use tern_common::error::{TernError, TernResult};
use tern_common::ids::{Key, PartitionId, ReplicaId, TxnId};

use crate::partitioning::Partitioner;
use crate::txn::{Transaction, TxnType};

/// Access mode requested for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access. A key present in both the read and write sets is write-locked.
    Write,
}

/// A transaction plus its partition-local derived views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnHolder {
    txn: Box<Transaction>,
    keys_in_partition: Vec<(Key, LockMode)>,
    involved_replicas: Vec<ReplicaId>,
    active_partitions: Vec<PartitionId>,
    num_involved_partitions: u32,
}

impl TxnHolder {
    /// Computes the derived views for `txn` on this partition.
    ///
    /// # Errors
    ///
    /// Returns `TernError::InvalidTransaction` when the transaction carries no master
    /// metadata; mastership cannot be resolved without it.
    pub fn new(partitioner: &Partitioner, txn: Box<Transaction>) -> TernResult<Self> {
        if txn.internal.master_metadata.is_empty() {
            return Err(TernError::InvalidTransaction(
                "transaction carries no master metadata",
            ));
        }

        let mut keys_in_partition = Vec::new();
        let mut involved_partitions = Vec::new();
        let mut active_partitions = Vec::new();
        let mut involved_replicas = Vec::new();

        for key in txn.read_set.keys() {
            involved_partitions.push(partitioner.partition_of_key(key));
            // A key that is also written takes a write lock instead.
            if partitioner.key_is_in_local_partition(key) && !txn.write_set.contains_key(key) {
                keys_in_partition.push((key.clone(), LockMode::Read));
            }
        }
        for key in txn.write_set.keys() {
            involved_partitions.push(partitioner.partition_of_key(key));
            active_partitions.push(partitioner.partition_of_key(key));
            if partitioner.key_is_in_local_partition(key) {
                keys_in_partition.push((key.clone(), LockMode::Write));
            }
        }

        for info in txn.internal.master_metadata.values() {
            involved_replicas.push(info.master);
        }
        if txn.internal.txn_type == TxnType::MultiHomeOrLockOnly
            && let Some(remaster) = &txn.remaster
        {
            involved_replicas.push(remaster.new_master);
        }

        involved_partitions.sort_unstable();
        involved_partitions.dedup();
        active_partitions.sort_unstable();
        active_partitions.dedup();
        involved_replicas.sort_unstable();
        involved_replicas.dedup();

        // Lock requests are issued in this order; keeping it stable keeps blocking
        // sets deterministic across runs.
        keys_in_partition.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

        Ok(Self {
            txn,
            keys_in_partition,
            involved_replicas,
            active_partitions,
            num_involved_partitions: involved_partitions.len() as u32,
        })
    }

    /// Returns the wrapped transaction.
    #[must_use]
    pub fn txn(&self) -> &Transaction {
        &self.txn
    }

    /// Returns the wrapped transaction mutably.
    pub fn txn_mut(&mut self) -> &mut Transaction {
        &mut self.txn
    }

    /// Consumes the holder, returning the transaction for dispatch.
    #[must_use]
    pub fn into_txn(self) -> Box<Transaction> {
        self.txn
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.txn.internal.id
    }

    /// Local keys and the lock mode each requires, in lock-request order.
    #[must_use]
    pub fn keys_in_partition(&self) -> &[(Key, LockMode)] {
        &self.keys_in_partition
    }

    /// Deduplicated replicas mastering at least one key of the transaction, including
    /// the destination replica of a multi-home remaster.
    #[must_use]
    pub fn involved_replicas(&self) -> &[ReplicaId] {
        &self.involved_replicas
    }

    /// Deduplicated partitions the write set touches.
    #[must_use]
    pub fn active_partitions(&self) -> &[PartitionId] {
        &self.active_partitions
    }

    /// Number of distinct partitions the transaction touches.
    #[must_use]
    pub fn num_involved_partitions(&self) -> u32 {
        self.num_involved_partitions
    }

    /// Replica whose log stream sequences this transaction or fragment.
    ///
    /// Single-home transactions and lock-only fragments carry uniform metadata, so any
    /// entry resolves the stream; the minimum is taken for determinism. The new-master
    /// fragment of a remaster is the one exception: it is sequenced by the destination
    /// replica while its metadata still names the old master.
    #[must_use]
    pub fn replica_id(&self) -> ReplicaId {
        if let Some(remaster) = &self.txn.remaster
            && remaster.is_new_master_lock_only
        {
            return remaster.new_master;
        }
        self.txn
            .internal
            .master_metadata
            .values()
            .map(|info| info.master)
            .min()
            .unwrap_or_default()
    }
}

//! Runtime configuration shared by module bootstrap code.

use std::time::Duration;

use crate::error::{TernError, TernResult};
use crate::ids::{MachineId, PartitionId, ReplicaId, WorkerCount};

/// Key-to-partition assignment rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    /// Keys are decimal integers; partition is `key % num_partitions` and the master
    /// replica is derived arithmetically from the key.
    Simple,
    /// Keys are arbitrary bytes; partition is FNV-1a over a bounded key prefix.
    Hash {
        /// Number of leading key bytes fed into the hash.
        partition_key_num_bytes: usize,
    },
}

/// Bootstrap configuration consumed by the scheduler core and the server composition root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Number of replicas (regions) the cluster spans.
    pub num_replicas: u32,
    /// Number of partitions per replica.
    pub num_partitions: u32,
    /// Replica this process belongs to.
    pub local_replica: ReplicaId,
    /// Partition this process owns.
    pub local_partition: PartitionId,
    /// Number of worker threads executing ready transactions.
    pub num_workers: WorkerCount,
    /// Period of the deadlock-resolver loop.
    pub ddr_interval: Duration,
    /// Number of replicas a local-log batch is replicated to; must not exceed
    /// `num_replicas`.
    pub replication_factor: u32,
    /// Key-to-partition assignment rule.
    pub partitioning: Partitioning,
    /// Whether multi-home transactions bypass the global orderer. Only changes when
    /// lock-only fragments become visible to the scheduler; the core is agnostic.
    pub bypass_mh_orderer: bool,
    /// Whether the sequencer aligns batches on synchronized timestamps. Not a core
    /// concern; carried for parity with the upstream pipeline.
    pub synchronized_batching: bool,
    /// Debugging shortcut: workers return a stripped transaction instead of the
    /// full payload.
    pub return_dummy_txn: bool,
    /// Metrics sampling rate, out of 256 recordings.
    pub sample_rate: u8,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            num_partitions: 1,
            local_replica: 0,
            local_partition: 0,
            num_workers: WorkerCount::new(2).expect("literal worker count must be non-zero"),
            ddr_interval: Duration::from_millis(40),
            replication_factor: 1,
            partitioning: Partitioning::Simple,
            bypass_mh_orderer: false,
            synchronized_batching: false,
            return_dummy_txn: false,
            sample_rate: 16,
        }
    }
}

impl ClusterConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `TernError::InvalidConfig` when the replica/partition space is empty,
    /// the local coordinates fall outside it, or the replication factor exceeds the
    /// number of replicas.
    pub fn validate(&self) -> TernResult<()> {
        if self.num_replicas == 0 {
            return Err(TernError::InvalidConfig("num_replicas must be positive"));
        }
        if self.num_partitions == 0 {
            return Err(TernError::InvalidConfig("num_partitions must be positive"));
        }
        if self.local_replica >= self.num_replicas {
            return Err(TernError::InvalidConfig(
                "local_replica is outside the replica space",
            ));
        }
        if self.local_partition >= self.num_partitions {
            return Err(TernError::InvalidConfig(
                "local_partition is outside the partition space",
            ));
        }
        if self.replication_factor > self.num_replicas {
            return Err(TernError::InvalidConfig(
                "replication factor must not exceed number of replicas",
            ));
        }
        Ok(())
    }

    /// Total number of machines in the cluster.
    #[must_use]
    pub fn num_machines(&self) -> u32 {
        self.num_replicas * self.num_partitions
    }

    /// Flattens `(replica, partition)` into a machine id.
    #[must_use]
    pub fn make_machine_id(&self, replica: ReplicaId, partition: PartitionId) -> MachineId {
        replica * self.num_partitions + partition
    }

    /// Splits a machine id back into `(replica, partition)`.
    #[must_use]
    pub fn unpack_machine_id(&self, machine_id: MachineId) -> (ReplicaId, PartitionId) {
        (
            machine_id / self.num_partitions,
            machine_id % self.num_partitions,
        )
    }

    /// Machine id of this process.
    #[must_use]
    pub fn local_machine_id(&self) -> MachineId {
        self.make_machine_id(self.local_replica, self.local_partition)
    }
}

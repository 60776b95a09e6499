//! Canonical identifier types used across scheduling, storage, and the server.

/// Opaque key bytes as seen by partitioning and the lock table.
pub type Key = Vec<u8>;

/// Opaque value bytes stored against a key.
pub type Value = Vec<u8>;

/// Unique 64-bit transaction identifier allocated by the coordinating server.
pub type TxnId = u64;

/// Replica (region) index inside the cluster, in `[0, num_replicas)`.
pub type ReplicaId = u32;

/// Partition index inside one replica, in `[0, num_partitions)`.
pub type PartitionId = u32;

/// Flat machine identifier: `replica * num_partitions + partition`.
pub type MachineId = u32;

/// Position inside one ordered log stream.
pub type SlotId = u32;

/// Reserved transaction id marking a removed edge in a waited-by list.
///
/// Real transaction ids are allocated from a counter and never reach this value.
pub const SENTINEL_TXN_ID: TxnId = TxnId::MAX;

/// Master replica assigned to keys that have never been written.
pub const DEFAULT_MASTER_OF_NEW_KEY: ReplicaId = 0;

/// Mastership record attached to a key, both in storage and in transaction metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MasterInfo {
    /// Replica currently mastering the key.
    pub master: ReplicaId,
    /// Remaster counter, bumped every time the key changes master.
    pub counter: u32,
}

impl MasterInfo {
    /// Creates a mastership record with a fresh counter.
    #[must_use]
    pub fn new(master: ReplicaId) -> Self {
        Self { master, counter: 0 }
    }
}

/// Key paired with the replica that masters it; the lock-table index unit.
///
/// The same key under two different masters is two different locks, which is what
/// makes remastering safe without draining the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyReplica {
    /// Raw key bytes.
    pub key: Key,
    /// Master replica the lock is taken under.
    pub master: ReplicaId,
}

impl KeyReplica {
    /// Builds the lock-table index for a key under a specific master.
    #[must_use]
    pub fn new(key: Key, master: ReplicaId) -> Self {
        Self { key, master }
    }
}

/// Strongly typed worker-count wrapper to avoid passing raw integers around pool APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerCount(u16);

impl WorkerCount {
    /// Creates a validated worker-count value.
    ///
    /// Returns `None` for zero because the scheduler always dispatches to at least
    /// one worker.
    #[must_use]
    pub fn new(value: u16) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Returns the inner count.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

//! Transaction record model.

use std::collections::HashMap;

use tern_common::ids::{Key, MasterInfo, ReplicaId, TxnId, Value};

/// Shape of a transaction as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    /// All keys are mastered by a single replica; the transaction is sequenced through
    /// that replica's local log only.
    SingleHome,
    /// Either the coordinator copy of a multi-home transaction or one of its per-replica
    /// lock-only fragments, distinguished by [`TxnInternal::home`].
    MultiHomeOrLockOnly,
}

/// Outcome of a transaction, set by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxnStatus {
    /// Not executed yet.
    #[default]
    NotStarted,
    /// All writes applied.
    Committed,
    /// Rejected during execution; see `abort_reason`.
    Aborted,
}

/// Remaster request carried instead of a key-value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemasterSpec {
    /// Replica the key is moving to.
    pub new_master: ReplicaId,
    /// Set on the lock-only fragment that locks the key under the new master; the
    /// other fragment locks it under the old master.
    pub is_new_master_lock_only: bool,
}

/// Bookkeeping fields attached by the pipeline rather than the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnInternal {
    /// Unique transaction id.
    pub id: TxnId,
    /// Single-home or multi-home/lock-only.
    pub txn_type: TxnType,
    /// For a single-home transaction, its home replica; for a lock-only fragment, the
    /// replica the fragment locks under. `None` marks the coordinator copy of a
    /// multi-home transaction.
    pub home: Option<ReplicaId>,
    /// Mastership metadata for every key the transaction touches.
    pub master_metadata: HashMap<Key, MasterInfo>,
    /// Server that coordinates the transaction and receives the result.
    pub coordinating_server: u32,
}

/// One transaction envelope flowing through the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Pipeline bookkeeping.
    pub internal: TxnInternal,
    /// Keys read, with slots for the values observed during execution.
    pub read_set: HashMap<Key, Value>,
    /// Keys written, with the values to apply.
    pub write_set: HashMap<Key, Value>,
    /// Remaster request; mutually exclusive with a key-value payload.
    pub remaster: Option<RemasterSpec>,
    /// Execution outcome.
    pub status: TxnStatus,
    /// Human-readable abort cause when `status` is `Aborted`.
    pub abort_reason: Option<String>,
}

impl Transaction {
    /// Creates an empty transaction shell.
    #[must_use]
    pub fn new(id: TxnId, txn_type: TxnType, home: Option<ReplicaId>) -> Self {
        Self {
            internal: TxnInternal {
                id,
                txn_type,
                home,
                master_metadata: HashMap::new(),
                coordinating_server: 0,
            },
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            remaster: None,
            status: TxnStatus::NotStarted,
            abort_reason: None,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.internal.id
    }

    /// Returns whether this transaction carries a remaster request.
    #[must_use]
    pub fn is_remaster(&self) -> bool {
        self.remaster.is_some()
    }

    /// Iterates over every key the transaction touches, write set first.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.write_set.keys().chain(
            self.read_set
                .keys()
                .filter(|key| !self.write_set.contains_key(*key)),
        )
    }

    /// Marks the transaction aborted with a reason.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.status = TxnStatus::Aborted;
        self.abort_reason = Some(reason.into());
    }
}

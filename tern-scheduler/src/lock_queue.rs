//! Compressed per-key lock queue.

use tern_common::ids::TxnId;

/// Tail of the logical lock queue for one key-replica.
///
/// Instead of a full reader/writer queue, only the most recent write requester and the
/// readers that followed it are kept. Earlier requesters are fully represented by the
/// wait-for edges already emitted when they acquired, so the tail is all a newcomer
/// needs to compute its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockQueueTail {
    write_requester: Option<TxnId>,
    read_requesters: Vec<TxnId>,
}

impl LockQueueTail {
    /// Appends a read requester and returns the write requester it depends on, if any.
    pub fn acquire_read(&mut self, txn_id: TxnId) -> Option<TxnId> {
        self.read_requesters.push(txn_id);
        self.write_requester
    }

    /// Installs a new write requester and returns its dependencies: the readers that
    /// followed the previous write (flushed), or else the previous write requester.
    pub fn acquire_write(&mut self, txn_id: TxnId) -> Vec<TxnId> {
        let deps = if self.read_requesters.is_empty() {
            self.write_requester.into_iter().collect()
        } else {
            std::mem::take(&mut self.read_requesters)
        };
        self.write_requester = Some(txn_id);
        deps
    }

    /// Most recent write requester.
    #[must_use]
    pub fn write_requester(&self) -> Option<TxnId> {
        self.write_requester
    }

    /// Read requesters that followed the most recent write.
    #[must_use]
    pub fn read_requesters(&self) -> &[TxnId] {
        &self.read_requesters
    }
}

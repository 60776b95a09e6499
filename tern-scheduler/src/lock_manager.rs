//! Dependency-driven-resolution (DDR) lock manager.
//!
//! Locks are not queued: each acquisition records wait-for edges against the current
//! holders returned by the per-key [`LockQueueTail`] and a transaction runs once its
//! predecessor count drops to zero. Cycles that this compression can produce between
//! complete multi-home transactions are broken by the background
//! [`resolver::DeadlockResolver`](crate::resolver::DeadlockResolver).

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::error;

use tern_common::ids::{KeyReplica, SENTINEL_TXN_ID, TxnId};
use tern_core::containers::HotMap;
use tern_core::holder::{LockMode, TxnHolder};
use tern_core::txn::Transaction;

use crate::lock_queue::LockQueueTail;

/// Outcome of a lock acquisition.
///
/// `Abort` is part of the contract for callers that implement abort policies (for
/// example on remaster conflicts); the lock manager itself never returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireLocksResult {
    /// Every requested lock is held and all fragments have arrived.
    Acquired,
    /// At least one predecessor must release first, or fragments are outstanding.
    Waiting,
    /// Reserved for caller-side abort decisions.
    Abort,
}

/// Wait-for bookkeeping for one transaction.
///
/// Counters are signed because `accept_transaction` and `acquire_locks` may arrive in
/// either order: an acquire-first arrival drives `unarrived_lock_requests` negative
/// until the accept catches up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxnInfo {
    pub(crate) id: TxnId,
    /// Lock-only fragments not yet seen, as a balance of accepts and acquires.
    pub(crate) unarrived_lock_requests: i32,
    /// Predecessors in the wait-for graph, duplicate-counted.
    pub(crate) num_waiting_for: i32,
    /// Successors in the wait-for graph. May contain duplicates (one per fragment that
    /// shares a predecessor) and `SENTINEL_TXN_ID` entries for removed edges.
    pub(crate) waited_by: Vec<TxnId>,
}

impl TxnInfo {
    pub(crate) fn new(id: TxnId) -> Self {
        Self {
            id,
            unarrived_lock_requests: 0,
            num_waiting_for: 0,
            waited_by: Vec::new(),
        }
    }

    /// All fragments have arrived.
    pub(crate) fn is_complete(&self) -> bool {
        self.unarrived_lock_requests == 0
    }

    /// Complete and not waiting on any predecessor.
    pub(crate) fn is_ready(&self) -> bool {
        self.is_complete() && self.num_waiting_for == 0
    }
}

/// Graph state shared between the scheduler thread and the deadlock resolver.
#[derive(Debug, Default)]
pub(crate) struct SharedGraph {
    /// Wait-for records, keyed by transaction id. Critical sections stay short; the
    /// mutex is never held across I/O or worker calls.
    pub(crate) txn_info: Mutex<HotMap<TxnId, TxnInfo>>,
    /// Transactions made ready by the resolver, drained by the scheduler.
    pub(crate) ready_txns: Mutex<Vec<TxnId>>,
}

impl SharedGraph {
    pub(crate) fn txn_info_guard(&self) -> std::sync::MutexGuard<'_, HotMap<TxnId, TxnInfo>> {
        self.txn_info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ready_txns_guard(&self) -> std::sync::MutexGuard<'_, Vec<TxnId>> {
        self.ready_txns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One lock-table row rendered for stats output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockTableEntry {
    /// Key and master, rendered `key:master`.
    pub key_replica: String,
    /// Most recent write requester.
    pub write_requester: Option<TxnId>,
    /// Read requesters that followed it.
    pub read_requesters: Vec<TxnId>,
}

/// Point-in-time lock-manager statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockManagerStats {
    /// Transactions currently tracked in the wait-for graph.
    pub num_txns_waiting: usize,
    /// Per-transaction predecessor counts; present at level 1 and above.
    pub waiting_for_per_txn: Option<Vec<(TxnId, i32)>>,
    /// Lock-table rows; present at level 2 and above.
    pub lock_table: Option<Vec<LockTableEntry>>,
}

/// The per-partition DDR lock manager.
///
/// The lock table is touched only by the scheduler thread during `acquire_locks`
/// (single writer); the wait-for graph is shared with the resolver behind a mutex.
#[derive(Debug, Default)]
pub struct DdrLockManager {
    shared: Arc<SharedGraph>,
    lock_table: HotMap<KeyReplica, LockQueueTail>,
}

impl DdrLockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared graph handle for wiring up a deadlock resolver.
    pub(crate) fn shared(&self) -> Arc<SharedGraph> {
        Arc::clone(&self.shared)
    }

    /// Registers the expected lock requests of a transaction.
    ///
    /// Adds the number of partition-local keys (or 2 for a remaster, which locks the
    /// key under both the old and the new master) to the outstanding-fragment balance.
    /// May be called before or after [`Self::acquire_locks`] for the same id; the two
    /// operations commute at the counter level.
    ///
    /// Returns whether the transaction is ready to dispatch.
    pub fn accept_transaction(&self, holder: &TxnHolder) -> bool {
        assert!(
            !holder.keys_in_partition().is_empty(),
            "empty transaction must not reach the lock manager"
        );
        let txn_id = holder.id();
        let expected = if holder.txn().is_remaster() {
            2
        } else {
            holder.keys_in_partition().len() as i32
        };

        let mut graph = self.shared.txn_info_guard();
        let info = graph.entry(txn_id).or_insert_with(|| TxnInfo::new(txn_id));
        info.unarrived_lock_requests += expected;
        info.is_ready()
    }

    /// Acquires all partition-local locks of a transaction or lock-only fragment.
    ///
    /// Emits a wait-for edge per blocking holder reported by the lock table; blockers
    /// that have already released are skipped because their edges are discharged.
    pub fn acquire_locks(&mut self, holder: &TxnHolder) -> AcquireLocksResult {
        assert!(
            !holder.keys_in_partition().is_empty(),
            "empty transaction must not reach the lock manager"
        );
        let txn = holder.txn();
        let txn_id = txn.id();
        let locks_to_request = Self::locks_to_request(holder);

        // Consult the compressed queue tails outside the graph mutex; the lock table
        // has a single writer (the scheduler thread).
        let mut blocking_txns = Vec::new();
        for (key_replica, mode) in &locks_to_request {
            let tail = self.lock_table.entry(key_replica.clone()).or_default();
            match mode {
                LockMode::Read => {
                    if let Some(write_requester) = tail.acquire_read(txn_id) {
                        blocking_txns.push(write_requester);
                    }
                }
                LockMode::Write => blocking_txns.extend(tail.acquire_write(txn_id)),
            }
        }
        blocking_txns.sort_unstable();
        blocking_txns.dedup();

        let mut graph = self.shared.txn_info_guard();
        let mut new_edges = 0;
        for &blocker in &blocking_txns {
            if blocker == txn_id {
                continue;
            }
            // Let A block a multi-home txn B: two fragments of B may both see A, so B
            // is appended twice to A's waited-by list and num_waiting_for counts both.
            // Releasing A then subtracts both, keeping the accounting balanced.
            if let Some(blocker_info) = graph.get_mut(&blocker) {
                blocker_info.waited_by.push(txn_id);
                new_edges += 1;
            }
        }
        let info = graph.entry(txn_id).or_insert_with(|| TxnInfo::new(txn_id));
        info.unarrived_lock_requests -= locks_to_request.len() as i32;
        info.num_waiting_for += new_edges;
        if info.is_ready() {
            AcquireLocksResult::Acquired
        } else {
            AcquireLocksResult::Waiting
        }
    }

    /// Convenience for single-home transactions: accept, then acquire.
    pub fn accept_txn_and_acquire_locks(&mut self, holder: &TxnHolder) -> AcquireLocksResult {
        let _ = self.accept_transaction(holder);
        self.acquire_locks(holder)
    }

    /// Releases every lock of a finished transaction and discharges its successors.
    ///
    /// Returns the transactions that became ready; a single release can ready several.
    ///
    /// # Panics
    ///
    /// Releasing an unknown or un-ready transaction is a programming error and aborts.
    pub fn release_locks(&self, txn: &Transaction) -> Vec<TxnId> {
        let txn_id = txn.id();
        let mut graph = self.shared.txn_info_guard();
        let info = graph
            .remove(&txn_id)
            .unwrap_or_else(|| panic!("released txn {txn_id} is not in the lock manager"));
        assert!(
            info.is_ready(),
            "releasing locks of un-ready txn {txn_id} is forbidden"
        );

        let mut newly_ready = Vec::new();
        for successor in info.waited_by {
            if successor == SENTINEL_TXN_ID {
                continue;
            }
            let Some(successor_info) = graph.get_mut(&successor) else {
                error!(successor, "blocked txn does not exist");
                continue;
            };
            successor_info.num_waiting_for -= 1;
            // The waited-by list may name the successor several times; it only becomes
            // ready when the last entry is accounted for.
            if successor_info.is_ready() {
                newly_ready.push(successor);
            }
        }
        newly_ready
    }

    /// Drains the transactions made ready by the deadlock resolver.
    #[must_use]
    pub fn get_ready_txns(&self) -> Vec<TxnId> {
        std::mem::take(&mut *self.shared.ready_txns_guard())
    }

    /// Collects statistics; higher levels include more detail.
    #[must_use]
    pub fn stats(&self, level: u32) -> LockManagerStats {
        let graph = self.shared.txn_info_guard();
        let waiting_for_per_txn = (level >= 1).then(|| {
            let mut rows: Vec<_> = graph
                .values()
                .map(|info| (info.id, info.num_waiting_for))
                .collect();
            rows.sort_unstable();
            rows
        });
        let lock_table = (level >= 2).then(|| {
            let mut rows: Vec<_> = self
                .lock_table
                .iter()
                .map(|(key_replica, tail)| LockTableEntry {
                    key_replica: format!(
                        "{}:{}",
                        String::from_utf8_lossy(&key_replica.key),
                        key_replica.master
                    ),
                    write_requester: tail.write_requester(),
                    read_requesters: tail.read_requesters().to_vec(),
                })
                .collect();
            rows.sort_unstable_by(|left, right| left.key_replica.cmp(&right.key_replica));
            rows
        });
        LockManagerStats {
            num_txns_waiting: graph.len(),
            waiting_for_per_txn,
            lock_table,
        }
    }

    fn locks_to_request(holder: &TxnHolder) -> Vec<(KeyReplica, LockMode)> {
        let txn = holder.txn();
        if let Some(remaster) = &txn.remaster {
            // A remaster has one key K but locks (K, old) and (K, new); this call
            // contributes whichever side the fragment stands for.
            let (key, _) = &holder.keys_in_partition()[0];
            let metadata = txn
                .internal
                .master_metadata
                .get(key)
                .unwrap_or_else(|| panic!("remaster key of txn {} has no metadata", txn.id()));
            let master = if remaster.is_new_master_lock_only {
                remaster.new_master
            } else {
                metadata.master
            };
            return vec![(KeyReplica::new(key.clone(), master), LockMode::Write)];
        }
        holder
            .keys_in_partition()
            .iter()
            .map(|(key, mode)| {
                let metadata = txn
                    .internal
                    .master_metadata
                    .get(key)
                    .unwrap_or_else(|| panic!("key of txn {} has no metadata", txn.id()));
                (KeyReplica::new(key.clone(), metadata.master), *mode)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{AcquireLocksResult, DdrLockManager};
    use tern_common::config::ClusterConfig;
    use tern_common::ids::{MasterInfo, TxnId};
    use tern_core::holder::TxnHolder;
    use tern_core::partitioning::Partitioner;
    use tern_core::txn::{RemasterSpec, Transaction, TxnType};
    use googletest::prelude::*;
    use rstest::rstest;

    fn partitioner() -> Partitioner {
        Partitioner::new(&ClusterConfig {
            num_replicas: 3,
            num_partitions: 1,
            ..ClusterConfig::default()
        })
    }

    fn holder(txn: Transaction) -> TxnHolder {
        TxnHolder::new(&partitioner(), Box::new(txn)).expect("test holder must build")
    }

    /// Single-home txn over `reads`/`writes`, all keys mastered by `master`.
    fn single_home(id: TxnId, reads: &[&[u8]], writes: &[&[u8]], master: u32) -> TxnHolder {
        let mut txn = Transaction::new(id, TxnType::SingleHome, Some(master));
        for key in reads {
            let _ = txn.read_set.insert(key.to_vec(), Vec::new());
            let _ = txn
                .internal
                .master_metadata
                .insert(key.to_vec(), MasterInfo::new(master));
        }
        for key in writes {
            let _ = txn.write_set.insert(key.to_vec(), Vec::new());
            let _ = txn
                .internal
                .master_metadata
                .insert(key.to_vec(), MasterInfo::new(master));
        }
        holder(txn)
    }

    /// Coordinator copy of a multi-home txn writing `keys`, each with its own master.
    fn multi_home(id: TxnId, keys: &[(&[u8], u32)]) -> TxnHolder {
        let mut txn = Transaction::new(id, TxnType::MultiHomeOrLockOnly, None);
        for (key, master) in keys {
            let _ = txn.write_set.insert(key.to_vec(), Vec::new());
            let _ = txn
                .internal
                .master_metadata
                .insert(key.to_vec(), MasterInfo::new(*master));
        }
        holder(txn)
    }

    /// Lock-only fragment of `multi_home` covering the keys mastered by `home`.
    fn lock_only(id: TxnId, keys: &[(&[u8], u32)], home: u32) -> TxnHolder {
        let mut txn = Transaction::new(id, TxnType::MultiHomeOrLockOnly, Some(home));
        for (key, master) in keys {
            if *master != home {
                continue;
            }
            let _ = txn.write_set.insert(key.to_vec(), Vec::new());
            let _ = txn
                .internal
                .master_metadata
                .insert(key.to_vec(), MasterInfo::new(*master));
        }
        holder(txn)
    }

    fn remaster_txn(id: TxnId, key: &[u8], old_master: u32, new_master: u32) -> Transaction {
        let mut txn = Transaction::new(id, TxnType::MultiHomeOrLockOnly, None);
        let _ = txn.write_set.insert(key.to_vec(), Vec::new());
        let _ = txn
            .internal
            .master_metadata
            .insert(key.to_vec(), MasterInfo::new(old_master));
        txn.remaster = Some(RemasterSpec {
            new_master,
            is_new_master_lock_only: false,
        });
        txn
    }

    #[rstest]
    fn write_conflict_serializes_and_release_readies_the_waiter() {
        let mut lm = DdrLockManager::new();
        let first = single_home(1, &[], &[b"x"], 0);
        let second = single_home(2, &[], &[b"x"], 0);

        assert_that!(
            lm.accept_txn_and_acquire_locks(&first),
            eq(AcquireLocksResult::Acquired)
        );
        assert_that!(
            lm.accept_txn_and_acquire_locks(&second),
            eq(AcquireLocksResult::Waiting)
        );

        let ready = lm.release_locks(first.txn());
        assert_that!(&ready, eq(&vec![2]));
    }

    #[rstest]
    fn readers_share_and_block_a_writer() {
        let mut lm = DdrLockManager::new();
        let reader_a = single_home(1, &[b"x"], &[], 0);
        let reader_b = single_home(2, &[b"x"], &[], 0);
        let writer = single_home(3, &[], &[b"x"], 0);

        assert_that!(
            lm.accept_txn_and_acquire_locks(&reader_a),
            eq(AcquireLocksResult::Acquired)
        );
        assert_that!(
            lm.accept_txn_and_acquire_locks(&reader_b),
            eq(AcquireLocksResult::Acquired)
        );
        assert_that!(
            lm.accept_txn_and_acquire_locks(&writer),
            eq(AcquireLocksResult::Waiting)
        );

        assert_that!(&lm.release_locks(reader_a.txn()), eq(&Vec::<u64>::new()));
        assert_that!(&lm.release_locks(reader_b.txn()), eq(&vec![3]));
    }

    #[rstest]
    fn acquire_before_accept_is_commutative() {
        let mut lm = DdrLockManager::new();
        let txn = single_home(1, &[b"a"], &[b"b"], 0);

        // Locks arrive first: the txn is unblocked but not complete.
        assert_that!(lm.acquire_locks(&txn), eq(AcquireLocksResult::Waiting));
        // The accept balances the fragment count and reports readiness.
        assert_that!(lm.accept_transaction(&txn), eq(true));
    }

    #[rstest]
    fn multi_home_is_ready_only_after_all_fragments_arrive() {
        let mut lm = DdrLockManager::new();
        let keys: &[(&[u8], u32)] = &[(b"a", 0), (b"b", 1)];
        let coordinator = multi_home(7, keys);
        let fragment_zero = lock_only(7, keys, 0);
        let fragment_one = lock_only(7, keys, 1);

        assert_that!(lm.accept_transaction(&coordinator), eq(false));
        assert_that!(lm.acquire_locks(&fragment_zero), eq(AcquireLocksResult::Waiting));
        assert_that!(lm.acquire_locks(&fragment_one), eq(AcquireLocksResult::Acquired));
    }

    #[rstest]
    fn fragments_may_arrive_before_the_coordinator_copy() {
        let mut lm = DdrLockManager::new();
        let keys: &[(&[u8], u32)] = &[(b"a", 0), (b"b", 1)];

        assert_that!(
            lm.acquire_locks(&lock_only(7, keys, 0)),
            eq(AcquireLocksResult::Waiting)
        );
        assert_that!(
            lm.acquire_locks(&lock_only(7, keys, 1)),
            eq(AcquireLocksResult::Waiting)
        );
        // The accept observes the already-balanced counters and reports ready.
        assert_that!(lm.accept_transaction(&multi_home(7, keys)), eq(true));
    }

    #[rstest]
    fn duplicate_blocker_edges_are_discharged_symmetrically() {
        let mut lm = DdrLockManager::new();
        // A single-home txn holds keys mastered by two replicas' worth of a multi-home
        // successor: both fragments of txn 2 see txn 1 as blocker.
        let blocker = single_home(1, &[], &[b"a", b"b"], 0);
        let keys: &[(&[u8], u32)] = &[(b"a", 0), (b"b", 0)];

        assert_that!(
            lm.accept_txn_and_acquire_locks(&blocker),
            eq(AcquireLocksResult::Acquired)
        );

        // Two fragments arriving separately against the same blocker.
        let mut fragment_a = Transaction::new(2, TxnType::MultiHomeOrLockOnly, Some(0));
        let _ = fragment_a.write_set.insert(b"a".to_vec(), Vec::new());
        let _ = fragment_a
            .internal
            .master_metadata
            .insert(b"a".to_vec(), MasterInfo::new(0));
        let mut fragment_b = Transaction::new(2, TxnType::MultiHomeOrLockOnly, Some(0));
        let _ = fragment_b.write_set.insert(b"b".to_vec(), Vec::new());
        let _ = fragment_b
            .internal
            .master_metadata
            .insert(b"b".to_vec(), MasterInfo::new(0));

        let _ = lm.accept_transaction(&multi_home(2, keys));
        assert_that!(
            lm.acquire_locks(&holder(fragment_a)),
            eq(AcquireLocksResult::Waiting)
        );
        assert_that!(
            lm.acquire_locks(&holder(fragment_b)),
            eq(AcquireLocksResult::Waiting)
        );

        // The blocker's waited-by list names txn 2 twice; releasing it discharges both
        // increments in one pass and readies txn 2 exactly once.
        let ready = lm.release_locks(blocker.txn());
        assert_that!(&ready, eq(&vec![2]));
    }

    #[rstest]
    fn departed_blockers_are_skipped() {
        let mut lm = DdrLockManager::new();
        let first = single_home(1, &[], &[b"x"], 0);
        assert_that!(
            lm.accept_txn_and_acquire_locks(&first),
            eq(AcquireLocksResult::Acquired)
        );
        let _ = lm.release_locks(first.txn());

        // Txn 1 still sits in the queue tail but has left the graph; its edge is
        // already discharged, so txn 2 acquires immediately.
        let second = single_home(2, &[], &[b"x"], 0);
        assert_that!(
            lm.accept_txn_and_acquire_locks(&second),
            eq(AcquireLocksResult::Acquired)
        );
    }

    #[rstest]
    fn remaster_needs_both_fragments() {
        let mut lm = DdrLockManager::new();
        let coordinator = holder(remaster_txn(9, b"k", 0, 2));

        // Old-master fragment locks (k, 0).
        let old_fragment = {
            let mut txn = remaster_txn(9, b"k", 0, 2);
            txn.internal.home = Some(0);
            holder(txn)
        };
        // New-master fragment locks (k, 2).
        let new_fragment = {
            let mut txn = remaster_txn(9, b"k", 0, 2);
            txn.internal.home = Some(2);
            txn.remaster = Some(RemasterSpec {
                new_master: 2,
                is_new_master_lock_only: true,
            });
            holder(txn)
        };

        assert_that!(lm.accept_transaction(&coordinator), eq(false));
        assert_that!(lm.acquire_locks(&old_fragment), eq(AcquireLocksResult::Waiting));
        assert_that!(lm.acquire_locks(&new_fragment), eq(AcquireLocksResult::Acquired));

        // The two fragments took distinct key-replica locks.
        let stats = lm.stats(2);
        let table = stats.lock_table.expect("level 2 includes the lock table");
        let expected = vec!["k:0".to_owned(), "k:2".to_owned()];
        let rows: Vec<_> = table.into_iter().map(|entry| entry.key_replica).collect();
        assert_that!(&rows, eq(&expected));
    }

    #[rstest]
    fn release_can_ready_multiple_transactions() {
        let mut lm = DdrLockManager::new();
        let writer = single_home(1, &[], &[b"x", b"y"], 0);
        let reader_x = single_home(2, &[b"x"], &[], 0);
        let reader_y = single_home(3, &[b"y"], &[], 0);

        assert_that!(
            lm.accept_txn_and_acquire_locks(&writer),
            eq(AcquireLocksResult::Acquired)
        );
        assert_that!(
            lm.accept_txn_and_acquire_locks(&reader_x),
            eq(AcquireLocksResult::Waiting)
        );
        assert_that!(
            lm.accept_txn_and_acquire_locks(&reader_y),
            eq(AcquireLocksResult::Waiting)
        );

        let mut ready = lm.release_locks(writer.txn());
        ready.sort_unstable();
        assert_that!(&ready, eq(&vec![2, 3]));
    }

    #[rstest]
    fn graph_mass_stays_balanced() {
        let mut lm = DdrLockManager::new();
        let writer = single_home(1, &[], &[b"x"], 0);
        let reader = single_home(2, &[b"x"], &[], 0);
        let second_writer = single_home(3, &[], &[b"x"], 0);

        let _ = lm.accept_txn_and_acquire_locks(&writer);
        let _ = lm.accept_txn_and_acquire_locks(&reader);
        let _ = lm.accept_txn_and_acquire_locks(&second_writer);

        let graph = lm.shared.txn_info_guard();
        let edges: i64 = graph
            .values()
            .map(|info| {
                info.waited_by
                    .iter()
                    .filter(|&&successor| successor != tern_common::ids::SENTINEL_TXN_ID)
                    .count() as i64
            })
            .sum();
        let waiting: i64 = graph.values().map(|info| i64::from(info.num_waiting_for)).sum();
        assert_that!(edges, eq(waiting));
    }

    #[rstest]
    #[should_panic(expected = "is not in the lock manager")]
    fn releasing_an_unknown_txn_aborts() {
        let lm = DdrLockManager::new();
        let ghost = single_home(42, &[], &[b"x"], 0);
        let _ = lm.release_locks(ghost.txn());
    }

    #[rstest]
    #[should_panic(expected = "un-ready")]
    fn releasing_an_unready_txn_aborts() {
        let mut lm = DdrLockManager::new();
        let first = single_home(1, &[], &[b"x"], 0);
        let second = single_home(2, &[], &[b"x"], 0);
        let _ = lm.accept_txn_and_acquire_locks(&first);
        let _ = lm.accept_txn_and_acquire_locks(&second);
        let _ = lm.release_locks(second.txn());
    }

    #[rstest]
    fn stats_levels_add_detail() {
        let mut lm = DdrLockManager::new();
        let writer = single_home(1, &[], &[b"x"], 0);
        let waiter = single_home(2, &[], &[b"x"], 0);
        let _ = lm.accept_txn_and_acquire_locks(&writer);
        let _ = lm.accept_txn_and_acquire_locks(&waiter);

        let level0 = lm.stats(0);
        assert_that!(level0.num_txns_waiting, eq(2_usize));
        assert_that!(&level0.waiting_for_per_txn, eq(&None));

        let level1 = lm.stats(1);
        let expected = vec![(1, 0), (2, 1)];
        assert_that!(level1.waiting_for_per_txn.as_ref(), eq(Some(&expected)));
    }
}

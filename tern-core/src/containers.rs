//! Hot-path container aliases used by core scheduling data structures.
//!
//! The lock table, the txn-info table, and the resolver's auxiliary graph all sit on
//! the per-transaction hot path. Keeping container choices centralized means a future
//! allocator or hasher change touches one place instead of every scheduling module.

use hashbrown::{HashMap as HbMap, HashSet as HbSet};

/// Hot-path hash map used by scheduler-local state tables.
pub type HotMap<K, V> = HbMap<K, V>;

/// Hot-path hash set used by secondary indexes.
pub type HotSet<T> = HbSet<T>;

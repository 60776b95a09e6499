//! In-memory record store shared by worker threads.

use std::sync::{PoisonError, RwLock};

use hashbrown::HashMap;

use tern_common::ids::{Key, MasterInfo, ReplicaId, Value};

/// One stored record: the value plus the key's mastership metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Stored value bytes.
    pub value: Value,
    /// Current master replica and remaster counter.
    pub metadata: MasterInfo,
}

impl Record {
    /// Creates a record mastered by `master` with a fresh counter.
    #[must_use]
    pub fn new(value: Value, master: ReplicaId) -> Self {
        Self {
            value,
            metadata: MasterInfo::new(master),
        }
    }
}

/// Key/value interface the workers execute against.
pub trait Storage: Send + Sync {
    /// Returns a copy of the record stored under `key`, if any.
    fn read(&self, key: &Key) -> Option<Record>;

    /// Stores `record` under `key`, replacing any previous record.
    fn write(&self, key: Key, record: Record);

    /// Removes the record under `key`. Returns whether a record existed.
    fn delete(&self, key: &Key) -> bool;

    /// Returns the mastership metadata of `key`, if the key exists.
    fn master_of(&self, key: &Key) -> Option<MasterInfo>;

    /// Reassigns `key` to `new_master`, bumping the remaster counter.
    ///
    /// Returns the updated metadata, or `None` when the key does not exist.
    fn remaster(&self, key: &Key, new_master: ReplicaId) -> Option<MasterInfo>;
}

/// Hash-map storage guarded for concurrent worker access.
#[derive(Debug, Default)]
pub struct MemStorage {
    records: RwLock<HashMap<Key, Record>>,
}

impl MemStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    /// Returns whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Key, Record>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Key, Record>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemStorage {
    fn read(&self, key: &Key) -> Option<Record> {
        self.read_guard().get(key).cloned()
    }

    fn write(&self, key: Key, record: Record) {
        let _ = self.write_guard().insert(key, record);
    }

    fn delete(&self, key: &Key) -> bool {
        self.write_guard().remove(key).is_some()
    }

    fn master_of(&self, key: &Key) -> Option<MasterInfo> {
        self.read_guard().get(key).map(|record| record.metadata)
    }

    fn remaster(&self, key: &Key, new_master: ReplicaId) -> Option<MasterInfo> {
        let mut records = self.write_guard();
        let record = records.get_mut(key)?;
        record.metadata.master = new_master;
        record.metadata.counter += 1;
        Some(record.metadata)
    }
}

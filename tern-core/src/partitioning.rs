//! Key-to-partition routing and arithmetic mastership.

use tern_common::config::{ClusterConfig, Partitioning};
use tern_common::ids::{DEFAULT_MASTER_OF_NEW_KEY, Key, PartitionId, ReplicaId};

/// Resolves key ownership to partitions and, under simple partitioning, to masters.
#[derive(Debug, Clone)]
pub struct Partitioner {
    num_partitions: u32,
    num_replicas: u32,
    local_partition: PartitionId,
    partitioning: Partitioning,
}

impl Partitioner {
    /// Builds a partitioner from process config.
    #[must_use]
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            num_partitions: config.num_partitions,
            num_replicas: config.num_replicas,
            local_partition: config.local_partition,
            partitioning: config.partitioning,
        }
    }

    /// Returns the partition owning `key`.
    ///
    /// Under simple partitioning a non-numeric key routes to partition 0; the workload
    /// generator only produces decimal keys in that mode.
    #[must_use]
    pub fn partition_of_key(&self, key: &Key) -> PartitionId {
        match self.partitioning {
            Partitioning::Simple => self.simple_key_index(key) % self.num_partitions,
            Partitioning::Hash {
                partition_key_num_bytes,
            } => {
                let prefix = &key[..partition_key_num_bytes.min(key.len())];
                fnv_hash(prefix) % self.num_partitions
            }
        }
    }

    /// Returns whether `key` is owned by this process's partition.
    #[must_use]
    pub fn key_is_in_local_partition(&self, key: &Key) -> bool {
        self.partition_of_key(key) == self.local_partition
    }

    /// Returns the master replica a brand-new key defaults to.
    ///
    /// Simple partitioning derives the master from the key arithmetically; hash
    /// partitioning assigns every new key to the default master region.
    #[must_use]
    pub fn default_master_of_key(&self, key: &Key) -> ReplicaId {
        match self.partitioning {
            Partitioning::Simple => {
                (self.simple_key_index(key) / self.num_partitions) % self.num_replicas
            }
            Partitioning::Hash { .. } => DEFAULT_MASTER_OF_NEW_KEY,
        }
    }

    fn simple_key_index(&self, key: &Key) -> u32 {
        std::str::from_utf8(key)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .map_or(0, |index| (index % u64::from(u32::MAX)) as u32)
    }
}

fn fnv_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash = hash.wrapping_mul(0x0100_0193);
        hash ^= u32::from(*byte);
    }
    hash
}

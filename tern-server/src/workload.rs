//! Synthetic transaction generator for driving a partition from the binary.

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use tern_common::config::ClusterConfig;
use tern_common::ids::Key;

use crate::app::TxnRequest;

/// Parameters of the basic uniform workload.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadParams {
    /// Keys touched per transaction.
    pub records: usize,
    /// How many of those keys are written.
    pub writes: usize,
    /// Bytes per written value.
    pub value_size: usize,
    /// Size of the partition-local key universe.
    pub num_keys: u32,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            records: 10,
            writes: 10,
            value_size: 100,
            num_keys: 1_000,
        }
    }
}

/// Uniform random workload over the local partition's key space.
///
/// Keys are decimal integers congruent to the local partition, so every generated
/// request passes the submit path's locality check under simple partitioning. With
/// more than one replica the arithmetic mastership splits the key space across
/// homes and a share of the requests comes out multi-home.
#[derive(Debug)]
pub struct BasicWorkload {
    params: WorkloadParams,
    num_partitions: u32,
    local_partition: u32,
    rng: StdRng,
}

impl BasicWorkload {
    /// Creates a deterministic workload from a seed.
    #[must_use]
    pub fn new(config: &ClusterConfig, params: WorkloadParams, seed: u64) -> Self {
        Self {
            params,
            num_partitions: config.num_partitions,
            local_partition: config.local_partition,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates the next transaction request.
    pub fn next_request(&mut self) -> TxnRequest {
        let mut keys: Vec<Key> = Vec::with_capacity(self.params.records);
        while keys.len() < self.params.records {
            let index = self.rng.gen_range(0..self.params.num_keys);
            let key = (index * self.num_partitions + self.local_partition)
                .to_string()
                .into_bytes();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let write_count = self.params.writes.min(keys.len());
        let mut request = TxnRequest::default();
        for (position, key) in keys.into_iter().enumerate() {
            if position < write_count {
                let value = vec![b'x'; self.params.value_size];
                request.write_set.push((key, value));
            } else {
                request.read_set.push(key);
            }
        }
        request
    }
}

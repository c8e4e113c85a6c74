use std::hash::{Hash, Hasher};

/// Assigns events a stable partition hash.
///
/// Events with equal hashes land on the same partition, which is what
/// keeps partitioned rollup correct: all events for one dimension value
/// must be aggregated by the same task.
pub trait Partitioner<T>: Send + Sync {
    fn partition_hash(&self, event: &T) -> u64;
}

/// Partitions by hashing a key extracted from the event.
pub struct KeyPartitioner<F> {
    extract: F,
}

impl<F> KeyPartitioner<F> {
    pub fn new(extract: F) -> Self {
        Self { extract }
    }
}

impl<T, K, F> Partitioner<T> for KeyPartitioner<F>
where
    K: Hash,
    F: Fn(&T) -> K + Send + Sync,
{
    fn partition_hash(&self, event: &T) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        (self.extract)(event).hash(&mut hasher);
        hasher.finish()
    }
}

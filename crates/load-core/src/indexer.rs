//! Point-to-worker sharding.

use crate::point::Point;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// Maps a point to a queue index in `[0, partitions)`.
///
/// The mapping must be deterministic for the lifetime of a run: the
/// same shard key always lands on the same index, because downstream
/// insert-ordering guarantees depend on co-locating an entity's points
/// on one worker.
pub trait PointIndexer: Send + Sync {
    fn index_for(&self, point: &Point) -> usize;
}

/// No sharding: every point goes to queue 0 (single-queue mode).
#[derive(Debug, Default)]
pub struct ConstantIndexer;

impl PointIndexer for ConstantIndexer {
    fn index_for(&self, _point: &Point) -> usize {
        0
    }
}

/// Hashes the point's primary tag (the entity identity, e.g. hostname)
/// across the partitions, so all points for one entity are handled by
/// the same worker and connection.
///
/// The hasher state is fixed at construction, which makes the mapping
/// stable for the whole run.
#[derive(Debug)]
pub struct HashIndexer {
    partitions: usize,
    state: RandomState,
}

impl HashIndexer {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            state: RandomState::new(),
        }
    }
}

impl PointIndexer for HashIndexer {
    fn index_for(&self, point: &Point) -> usize {
        let mut hasher = self.state.build_hasher();
        point.primary_tag().hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }
}

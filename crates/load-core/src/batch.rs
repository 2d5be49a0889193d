//! Batches and the per-shard batching discipline.

use crate::point::Point;
use std::sync::Arc;

/// A bounded, ordered group of points destined for one shard.
///
/// Created by the [`Batcher`], consumed exactly once by a processor.
#[derive(Debug, Default)]
pub struct Batch {
    points: Vec<Point>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }
}

/// Seam for batch construction. The default allocates a fresh batch;
/// implementations may recycle buffers from a pool to cut allocation
/// churn, which affects performance only, never correctness.
pub trait BatchFactory: Send + Sync {
    fn new_batch(&self, capacity: usize) -> Batch;
}

/// Allocating factory used unless the target overrides it.
#[derive(Debug, Default)]
pub struct DefaultBatchFactory;

impl BatchFactory for DefaultBatchFactory {
    fn new_batch(&self, capacity: usize) -> Batch {
        Batch::with_capacity(capacity)
    }
}

/// Accumulates points into per-shard batches of `batch_size` points,
/// preserving arrival order within each shard. Trailing partial
/// batches are surfaced by [`Batcher::flush`] at stream end.
pub struct Batcher {
    batch_size: usize,
    factory: Arc<dyn BatchFactory>,
    pending: Vec<Batch>,
}

impl Batcher {
    pub fn new(batch_size: usize, partitions: usize, factory: Arc<dyn BatchFactory>) -> Self {
        let pending = (0..partitions)
            .map(|_| factory.new_batch(batch_size))
            .collect();
        Self {
            batch_size,
            factory,
            pending,
        }
    }

    /// Append a point to its shard's batch. Returns the batch once it
    /// reaches `batch_size`, leaving a fresh one in its place.
    pub fn push(&mut self, shard: usize, point: Point) -> Option<Batch> {
        let slot = &mut self.pending[shard];
        slot.push(point);
        if slot.len() == self.batch_size {
            let full = std::mem::replace(slot, self.factory.new_batch(self.batch_size));
            Some(full)
        } else {
            None
        }
    }

    /// Drain the trailing partial batches, shard id attached. Called
    /// once at end-of-stream; partials are flushed, never dropped.
    pub fn flush(&mut self) -> Vec<(usize, Batch)> {
        self.pending
            .iter_mut()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(shard, b)| (shard, std::mem::take(b)))
            .collect()
    }
}

//! Contracts a backend implementation must satisfy to plug into the
//! pipeline unmodified.

use crate::batch::{Batch, BatchFactory, DefaultBatchFactory};
use crate::decoder::Header;
use crate::error::LoadError;
use crate::indexer::PointIndexer;
use async_trait::async_trait;
use std::sync::Arc;

/// Counts reported by a processor for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Metric values written (or validated in dry-run mode).
    pub metric_count: u64,
    /// Rows written (or validated in dry-run mode).
    pub row_count: u64,
}

impl BatchStats {
    pub fn new(metric_count: u64, row_count: u64) -> Self {
        Self {
            metric_count,
            row_count,
        }
    }

    pub fn merge(&mut self, other: BatchStats) {
        self.metric_count += other.metric_count;
        self.row_count += other.row_count;
    }
}

/// Backend schema bootstrap, run once before any load work begins.
///
/// An "already exists" response from [`create_db`](DbCreator::create_db)
/// must be reported as [`BackendErrorKind::AlreadyExists`]; the run
/// controller treats it as success (idempotent bootstrap), never as a
/// failure.
///
/// [`BackendErrorKind::AlreadyExists`]: crate::error::BackendErrorKind::AlreadyExists
#[async_trait]
pub trait DbCreator: Send {
    /// Inspect the stream header and prepare for bootstrap.
    async fn init(&mut self, header: &Header) -> Result<(), LoadError>;

    async fn db_exists(&mut self, db_name: &str) -> Result<bool, LoadError>;

    async fn remove_old_db(&mut self, db_name: &str) -> Result<(), LoadError>;

    async fn create_db(&mut self, db_name: &str) -> Result<(), LoadError>;

    /// Schema and index bootstrap after the database exists.
    async fn post_create_db(&mut self, db_name: &str) -> Result<(), LoadError>;

    async fn close(&mut self) -> Result<(), LoadError>;
}

/// Per-worker batch processor bound to one backend connection.
///
/// When `do_load` is false the processor must still decode and
/// validate the batch shape but perform no backend writes, so a dry
/// run measures decode and batching overhead alone.
#[async_trait]
pub trait Processor: Send {
    /// Called once per worker before the first batch.
    async fn init(&mut self, worker_id: usize, do_load: bool) -> Result<(), LoadError>;

    /// Process one batch atomically from the backend's perspective.
    async fn process_batch(&mut self, batch: Batch, do_load: bool)
        -> Result<BatchStats, LoadError>;

    /// Called once per worker after the stream completes.
    async fn close(&mut self, do_load: bool) -> Result<(), LoadError>;
}

/// A pluggable backend: the factory seam tying the collaborator
/// contracts together for one target database.
pub trait Target: Send + Sync {
    /// Bootstrap collaborator, consumed by the run controller.
    fn db_creator(&self) -> Box<dyn DbCreator>;

    /// One processor per worker; connections are opened in
    /// [`Processor::init`], not here.
    fn processor(&self, header: Arc<Header>) -> Box<dyn Processor>;

    /// Batch construction seam; override to recycle buffers.
    fn batch_factory(&self) -> Arc<dyn BatchFactory> {
        Arc::new(DefaultBatchFactory)
    }

    /// Backend-specific indexer override. `None` selects the indexer
    /// configured on the pipeline.
    fn point_indexer(&self, _partitions: usize) -> Option<Box<dyn PointIndexer>> {
        None
    }
}

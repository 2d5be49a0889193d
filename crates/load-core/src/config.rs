//! Pipeline configuration.

use crate::error::LoadError;
use crate::indexer::{ConstantIndexer, HashIndexer, PointIndexer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How batches are queued to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMode {
    /// One shared bounded queue; any idle worker takes any batch.
    /// Maximizes throughput when cross-shard order is irrelevant.
    SingleQueue,
    /// One bounded queue per worker, selected by the point indexer.
    /// Guarantees a shard's batches are processed by one worker in
    /// enqueue order.
    WorkerPerQueue,
}

/// Which point indexer the pipeline builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerKind {
    /// Everything on queue 0.
    Constant,
    /// Consistent hash of the entity tag across the queues.
    HashOnEntity,
}

impl IndexerKind {
    pub fn build(&self, partitions: usize) -> Box<dyn PointIndexer> {
        match self {
            IndexerKind::Constant => Box::new(ConstantIndexer),
            IndexerKind::HashOnEntity => Box::new(HashIndexer::new(partitions)),
        }
    }
}

/// Options recognized by the load pipeline.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Name of the database to load into.
    pub db_name: String,
    /// Number of parallel workers.
    pub workers: usize,
    /// Points per batch.
    pub batch_size: usize,
    /// Batches buffered per queue before the producer blocks.
    pub queue_depth: usize,
    pub queue_mode: QueueMode,
    pub indexer: IndexerKind,
    /// False runs the whole pipeline without backend writes.
    pub do_load: bool,
    /// Whether to run the DBCreator bootstrap at all.
    pub do_create_db: bool,
    /// Abort instead of dropping a pre-existing database.
    pub do_abort_on_exist: bool,
    /// Log per-batch timing at debug level.
    pub log_batches: bool,
    /// Interval for progress reports; zero disables them.
    pub reporting_period: Duration,
}

impl LoadConfig {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            workers: 8,
            batch_size: 10_000,
            queue_depth: 8,
            queue_mode: QueueMode::SingleQueue,
            indexer: IndexerKind::Constant,
            do_load: true,
            do_create_db: true,
            do_abort_on_exist: false,
            log_batches: false,
            reporting_period: Duration::from_secs(10),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    pub fn with_indexer(mut self, indexer: IndexerKind) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_do_load(mut self, do_load: bool) -> Self {
        self.do_load = do_load;
        self
    }

    pub fn with_do_create_db(mut self, do_create_db: bool) -> Self {
        self.do_create_db = do_create_db;
        self
    }

    pub fn with_abort_on_exist(mut self, abort: bool) -> Self {
        self.do_abort_on_exist = abort;
        self
    }

    pub fn with_log_batches(mut self, log_batches: bool) -> Self {
        self.log_batches = log_batches;
        self
    }

    pub fn with_reporting_period(mut self, period: Duration) -> Self {
        self.reporting_period = period;
        self
    }

    /// Entity-hashed sharding with one queue per worker: the mode
    /// required when per-entity insert order matters downstream.
    pub fn with_hash_workers(self) -> Self {
        self.with_indexer(IndexerKind::HashOnEntity)
            .with_queue_mode(QueueMode::WorkerPerQueue)
    }

    /// Number of queues the pipeline runs with.
    pub fn partitions(&self) -> usize {
        match self.queue_mode {
            QueueMode::SingleQueue => 1,
            QueueMode::WorkerPerQueue => self.workers,
        }
    }

    /// Startup validation; every failure here is fatal before any
    /// work begins.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.workers == 0 {
            return Err(LoadError::Config("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(LoadError::Config("batch size must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(LoadError::Config("queue depth must be at least 1".into()));
        }
        if self.db_name.is_empty() && self.do_create_db {
            return Err(LoadError::Config(
                "database name required when bootstrap is enabled".into(),
            ));
        }
        if self.queue_mode == QueueMode::WorkerPerQueue
            && self.workers > 1
            && self.indexer == IndexerKind::Constant
        {
            // Every batch would land on worker 0 while the remaining
            // queues starve.
            return Err(LoadError::Config(
                "worker-per-queue mode requires an entity-hashed indexer".into(),
            ));
        }
        Ok(())
    }
}

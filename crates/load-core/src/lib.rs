//! Concurrent load pipeline for database benchmarking.
//!
//! The pipeline streams serialized time-series points from an input
//! source, fans them out across a bounded worker pool, and drives
//! backend-specific bulk inserts while tracking throughput:
//!
//! 1. [`Decoder`] turns the byte stream into typed [`Point`]s.
//! 2. A [`PointIndexer`] assigns each point a shard.
//! 3. The [`Batcher`] groups points per shard into bounded [`Batch`]es.
//! 4. The [`LoadRunner`] delivers batches over bounded queues to a
//!    pool of workers, each bound to one [`Processor`].
//! 5. Processors consult the shared [`TagCache`] and
//!    [`StatementCache`] before issuing backend operations.
//!
//! Backends plug in through the [`Target`], [`Processor`] and
//! [`DbCreator`] seams without touching the pipeline.
//!
//! # Example
//!
//! ```ignore
//! use load_core::{LoadConfig, LoadRunner};
//!
//! let config = LoadConfig::new("benchmark")
//!     .with_workers(8)
//!     .with_batch_size(10_000)
//!     .with_hash_workers();
//! let runner = LoadRunner::new(config)?;
//! let report = runner.run(&target, reader).await?;
//! println!("{}", report.summary());
//! ```

pub mod batch;
pub mod config;
pub mod contracts;
pub mod decoder;
pub mod error;
pub mod indexer;
pub mod point;
pub mod report;
pub mod runner;
pub mod statement_cache;
pub mod tag_cache;

pub use batch::{Batch, BatchFactory, Batcher, DefaultBatchFactory};
pub use config::{IndexerKind, LoadConfig, QueueMode};
pub use contracts::{BatchStats, DbCreator, Processor, Target};
pub use decoder::{Decoder, Header, TableSchema, TagColumn, TagType};
pub use error::{BackendErrorKind, LoadError};
pub use indexer::{ConstantIndexer, HashIndexer, PointIndexer};
pub use point::Point;
pub use report::{LoadReport, RunCounters, WorkerStats};
pub use runner::LoadRunner;
pub use statement_cache::StatementCache;
pub use tag_cache::{TagCache, TagRecord};

//! seriesload
//!
//! A database-agnostic load-testing harness for time-series bulk
//! ingestion. The concurrent pipeline lives in the `load-core` crate;
//! this crate adds the CLI, an in-memory reference backend, and test
//! helpers.
//!
//! # CLI Usage
//!
//! ```bash
//! # Load a generated dataset with 8 workers, entity-hashed sharding
//! seriesload --file data.txt --workers 8 --hash-workers
//!
//! # Dry run: measure decode and batching overhead alone
//! seriesload --file data.txt --dry-run
//!
//! # Stream from stdin, JSON report on stdout
//! generator | seriesload --json
//! ```

pub mod memory;
pub mod testing;

// Re-export the pipeline crate for convenience.
pub use load_core;

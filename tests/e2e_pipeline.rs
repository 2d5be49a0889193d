//! End-to-end pipeline tests against the in-memory backend.

use load_core::{LoadConfig, LoadError, LoadRunner};
use seriesload::memory::MemoryTarget;
use seriesload::testing::{sample_stream, sample_stream_points};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::io::BufReader;
use tokio_test::assert_ok;

fn config() -> LoadConfig {
    LoadConfig::new("bench").with_reporting_period(Duration::ZERO)
}

#[tokio::test]
async fn test_single_queue_full_load() {
    let input = sample_stream(6, 10);
    let points = sample_stream_points(6, 10);
    let runner = LoadRunner::new(config().with_workers(3).with_batch_size(7)).unwrap();
    let target = MemoryTarget::new();

    let report = runner.run(&target, input.as_bytes()).await.unwrap();
    assert_eq!(report.points, points);
    assert_eq!(report.row_count, points);
    // Two metric values per point.
    assert_eq!(report.metric_count, points * 2);

    let store = target.store();
    assert!(store.database_exists("bench"));
    assert_eq!(store.fact_count() as u64, points);
    assert_eq!(store.facts("cpu").len() as u64, points / 2);
    assert_eq!(store.facts("mem").len() as u64, points / 2);
}

#[tokio::test]
async fn test_surrogate_ids_dense_across_workers() {
    let hosts = 40;
    let input = sample_stream(hosts, 5);
    let runner = LoadRunner::new(
        config()
            .with_workers(4)
            .with_batch_size(16)
            .with_hash_workers(),
    )
    .unwrap();
    let target = MemoryTarget::new();

    runner.run(&target, input.as_bytes()).await.unwrap();

    // One tag tuple per host; ids are exactly 1..=hosts, no
    // duplicates, no gaps, no matter how workers interleaved.
    let tags = target.store().tags();
    assert_eq!(tags.len(), hosts);
    assert_eq!(target.tag_cache().len(), hosts);
    let ids: HashSet<i64> = tags.iter().map(|t| t.id).collect();
    assert_eq!(ids.len(), hosts);
    assert_eq!(*ids.iter().min().unwrap(), 1);
    assert_eq!(*ids.iter().max().unwrap(), hosts as i64);

    // Every fact row references an assigned tuple.
    for table in ["cpu", "mem"] {
        for fact in target.store().facts(table) {
            assert!(ids.contains(&fact.tag_id), "dangling tag id {}", fact.tag_id);
        }
    }
}

#[tokio::test]
async fn test_worker_per_queue_preserves_entity_order() {
    let input = sample_stream(9, 30);
    let runner = LoadRunner::new(
        config()
            .with_workers(3)
            .with_batch_size(5)
            .with_hash_workers(),
    )
    .unwrap();
    let target = MemoryTarget::new();

    runner.run(&target, input.as_bytes()).await.unwrap();

    // All of an entity's batches go through one worker in enqueue
    // order, so per-entity timestamps land in input order.
    for table in ["cpu", "mem"] {
        let mut per_entity: HashMap<i64, Vec<i64>> = HashMap::new();
        for fact in target.store().facts(table) {
            per_entity.entry(fact.tag_id).or_default().push(fact.timestamp);
        }
        assert_eq!(per_entity.len(), 9);
        for (tag_id, timestamps) in per_entity {
            let mut sorted = timestamps.clone();
            sorted.sort_unstable();
            assert_eq!(timestamps, sorted, "entity {tag_id} out of order in {table}");
            assert_eq!(timestamps.len(), 30);
        }
    }
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let input = sample_stream(4, 8);
    let points = sample_stream_points(4, 8);
    let runner = LoadRunner::new(
        config()
            .with_workers(2)
            .with_batch_size(10)
            .with_do_load(false)
            .with_do_create_db(false),
    )
    .unwrap();
    let target = MemoryTarget::new();

    let report = runner.run(&target, input.as_bytes()).await.unwrap();
    assert_eq!(report.row_count, points);
    assert_eq!(report.metric_count, points * 2);

    let store = target.store();
    assert!(!store.database_exists("bench"));
    assert_eq!(store.fact_count(), 0);
    assert!(store.tags().is_empty());
    assert!(target.tag_cache().is_empty());
}

#[tokio::test]
async fn test_rerun_replaces_existing_database() {
    let input = sample_stream(3, 4);
    let points = sample_stream_points(3, 4);
    let first = MemoryTarget::new();
    let store = first.store();

    let runner = LoadRunner::new(config().with_workers(2).with_batch_size(5)).unwrap();
    runner.run(&first, input.as_bytes()).await.unwrap();
    assert_eq!(store.fact_count() as u64, points);

    // A second run finds the database, drops it, and loads cleanly.
    let second = MemoryTarget::with_store(store.clone());
    runner.run(&second, input.as_bytes()).await.unwrap();
    assert_eq!(store.fact_count() as u64, points);
    assert_eq!(store.tags().len(), 3);
}

#[tokio::test]
async fn test_abort_on_existing_database() {
    let input = sample_stream(2, 2);
    let target = MemoryTarget::new();
    let runner = LoadRunner::new(config().with_workers(1)).unwrap();
    runner.run(&target, input.as_bytes()).await.unwrap();

    let rerun = LoadRunner::new(config().with_workers(1).with_abort_on_exist(true)).unwrap();
    let second = MemoryTarget::with_store(target.store());
    let err = rerun.run(&second, input.as_bytes()).await.err().unwrap();
    assert!(matches!(err, LoadError::Config(_)), "{err}");
}

#[tokio::test]
async fn test_statement_cache_converges_on_batch_shapes() {
    // Points alternate cpu/mem, so every full batch of 4 splits into
    // two rows per table: the cache settles on one shape per table.
    let input = sample_stream(6, 10);
    let runner = LoadRunner::new(config().with_workers(2).with_batch_size(4)).unwrap();
    let target = MemoryTarget::new();

    runner.run(&target, input.as_bytes()).await.unwrap();
    assert_eq!(target.statement_cache().len(), 2);
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, sample_stream(2, 5)).unwrap();

    let runner = LoadRunner::new(config().with_workers(2).with_batch_size(3)).unwrap();
    let target = MemoryTarget::new();
    let file = tokio::fs::File::open(&path).await.unwrap();

    let report = assert_ok!(runner.run(&target, BufReader::new(file)).await);
    assert_eq!(report.points, sample_stream_points(2, 5));
    assert_eq!(target.store().fact_count() as u64, report.points);
}

#[tokio::test]
async fn test_malformed_header_aborts_before_load() {
    let input = "tags,hostname string\ncpu,usage_user\ntags,hostname=h1\ncpu,100,1.0\n";
    let runner = LoadRunner::new(config().with_workers(1)).unwrap();
    let target = MemoryTarget::new();

    let err = runner.run(&target, input.as_bytes()).await.err().unwrap();
    assert!(matches!(err, LoadError::Protocol { .. }), "{err}");
    assert!(!target.store().database_exists("bench"));
}

//! Run controller: owns the worker pool, routes batches, aggregates
//! totals, and decides how errors end the run.

use crate::batch::{Batch, Batcher};
use crate::config::{LoadConfig, QueueMode};
use crate::contracts::{Processor, Target};
use crate::decoder::{Decoder, Header};
use crate::error::{BackendErrorKind, LoadError};
use crate::report::{LoadReport, RunCounters, WorkerStats};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where a worker dequeues its batches from.
enum WorkerQueue {
    /// Exclusively owned queue (worker-per-queue mode).
    Own(mpsc::Receiver<Batch>),
    /// Shared queue; the mutex serializes the dequeue itself, not the
    /// processing (single-queue mode).
    Shared(Arc<Mutex<mpsc::Receiver<Batch>>>),
}

impl WorkerQueue {
    async fn recv(&mut self) -> Option<Batch> {
        match self {
            WorkerQueue::Own(rx) => rx.recv().await,
            WorkerQueue::Shared(rx) => rx.lock().await.recv().await,
        }
    }
}

/// Drives a full load run: bootstrap, decode, batch, fan out, report.
///
/// The runner holds no business logic of its own; everything
/// backend-specific lives behind the [`Target`] seams. The only
/// cross-worker shared mutable state in a run is whatever caches the
/// target's processors share.
pub struct LoadRunner {
    config: LoadConfig,
}

impl LoadRunner {
    /// Validate the configuration and build a runner. Invalid option
    /// combinations fail here, before any work begins.
    pub fn new(config: LoadConfig) -> Result<Self, LoadError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Run the pipeline to completion over `reader`.
    ///
    /// Any fatal error (protocol, configuration, backend) stops the
    /// run and is returned; partial totals are never reported as a
    /// final result. The one recovered case is an "already exists"
    /// response during database creation.
    pub async fn run<R>(&self, target: &dyn Target, reader: R) -> Result<LoadReport, LoadError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut decoder = Decoder::new(reader).await?;
        let header = decoder.header();

        if self.config.do_create_db {
            self.bootstrap(target, &header).await?;
        } else {
            debug!("bootstrap disabled, loading into existing schema");
        }

        let partitions = self.config.partitions();
        let (senders, queues) = self.build_queues(partitions);

        let counters = Arc::new(RunCounters::default());
        let started = Instant::now();

        let mut handles: Vec<JoinHandle<Result<WorkerStats, LoadError>>> =
            Vec::with_capacity(self.config.workers);
        for (worker_id, queue) in queues.into_iter().enumerate() {
            let processor = target.processor(Arc::clone(&header));
            let counters = Arc::clone(&counters);
            let do_load = self.config.do_load;
            let log_batches = self.config.log_batches;
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                processor,
                queue,
                do_load,
                log_batches,
                counters,
            )));
        }
        info!(
            workers = self.config.workers,
            partitions,
            batch_size = self.config.batch_size,
            queue_depth = self.config.queue_depth,
            do_load = self.config.do_load,
            "load started"
        );

        let reporter = self.spawn_reporter(Arc::clone(&counters), started);

        let produce_result = self.produce(target, &mut decoder, senders, partitions).await;

        // Workers drain the closed queues, then close their
        // processors. The first worker error is the root cause even
        // when the producer also failed (its send fails once a worker
        // queue is gone).
        let mut worker_error: Option<LoadError> = None;
        let mut worker_stats = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(stats)) => worker_stats.push(stats),
                Ok(Err(e)) => {
                    if worker_error.is_none() {
                        worker_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if worker_error.is_none() {
                        worker_error = Some(LoadError::backend(
                            BackendErrorKind::Operation,
                            format!("worker task failed: {join_err}"),
                        ));
                    }
                }
            }
        }
        if let Some(handle) = reporter {
            handle.abort();
        }

        if let Some(e) = worker_error {
            return Err(e);
        }
        let points = produce_result?;

        let report = LoadReport::new(points, started.elapsed(), worker_stats);
        info!("{}", report.summary());
        Ok(report)
    }

    /// Schema bootstrap via the target's DBCreator. "Already exists"
    /// on create is success, the single built-in recovery path.
    async fn bootstrap(&self, target: &dyn Target, header: &Header) -> Result<(), LoadError> {
        let db_name = &self.config.db_name;
        let mut creator = target.db_creator();
        creator.init(header).await?;

        if creator.db_exists(db_name).await? {
            if self.config.do_abort_on_exist {
                creator.close().await?;
                return Err(LoadError::Config(format!(
                    "database '{db_name}' already exists and abort-on-exist is set"
                )));
            }
            info!(db_name, "database exists, removing before load");
            creator.remove_old_db(db_name).await?;
        }

        match creator.create_db(db_name).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                info!(db_name, "database already exists, continuing");
            }
            Err(e) => {
                creator.close().await?;
                return Err(e);
            }
        }

        creator.post_create_db(db_name).await?;
        creator.close().await?;
        Ok(())
    }

    fn build_queues(&self, partitions: usize) -> (Vec<mpsc::Sender<Batch>>, Vec<WorkerQueue>) {
        match self.config.queue_mode {
            QueueMode::SingleQueue => {
                let (tx, rx) = mpsc::channel(self.config.queue_depth);
                let shared = Arc::new(Mutex::new(rx));
                let queues = (0..self.config.workers)
                    .map(|_| WorkerQueue::Shared(Arc::clone(&shared)))
                    .collect();
                (vec![tx], queues)
            }
            QueueMode::WorkerPerQueue => {
                let mut senders = Vec::with_capacity(partitions);
                let mut queues = Vec::with_capacity(partitions);
                for _ in 0..partitions {
                    let (tx, rx) = mpsc::channel(self.config.queue_depth);
                    senders.push(tx);
                    queues.push(WorkerQueue::Own(rx));
                }
                (senders, queues)
            }
        }
    }

    /// Single-producer decode/batch loop. Bounded sends provide the
    /// backpressure: a full queue blocks this loop, so in-flight
    /// memory stays at partitions x queue_depth x batch_size.
    async fn produce<R>(
        &self,
        target: &dyn Target,
        decoder: &mut Decoder<R>,
        senders: Vec<mpsc::Sender<Batch>>,
        partitions: usize,
    ) -> Result<u64, LoadError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let indexer = target
            .point_indexer(partitions)
            .unwrap_or_else(|| self.config.indexer.build(partitions));
        let mut batcher = Batcher::new(self.config.batch_size, partitions, target.batch_factory());

        let mut points: u64 = 0;
        while let Some(point) = decoder.next_point().await? {
            points += 1;
            let shard = indexer.index_for(&point);
            if let Some(batch) = batcher.push(shard, point) {
                send_batch(&senders, shard, batch).await?;
            }
        }
        for (shard, batch) in batcher.flush() {
            send_batch(&senders, shard, batch).await?;
        }
        // Dropping the senders closes the queues and lets the workers
        // finish their drain.
        drop(senders);
        Ok(points)
    }

    fn spawn_reporter(
        &self,
        counters: Arc<RunCounters>,
        started: Instant,
    ) -> Option<JoinHandle<()>> {
        let period = self.config.reporting_period;
        if period.is_zero() {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let elapsed = started.elapsed().as_secs_f64();
                let rows = counters.rows();
                info!(
                    rows,
                    metrics = counters.metrics(),
                    rows_per_sec = format!("{:.2}", rows as f64 / elapsed),
                    "load in progress"
                );
            }
        }))
    }
}

async fn send_batch(
    senders: &[mpsc::Sender<Batch>],
    shard: usize,
    batch: Batch,
) -> Result<(), LoadError> {
    // The indexer contract keeps shard below the queue count.
    senders[shard].send(batch).await.map_err(|_| {
        LoadError::backend(
            BackendErrorKind::Operation,
            "worker queue closed before end of stream",
        )
    })
}

async fn worker_loop(
    worker_id: usize,
    mut processor: Box<dyn Processor>,
    mut queue: WorkerQueue,
    do_load: bool,
    log_batches: bool,
    counters: Arc<RunCounters>,
) -> Result<WorkerStats, LoadError> {
    processor.init(worker_id, do_load).await?;
    let mut stats = WorkerStats::new(worker_id);
    while let Some(batch) = queue.recv().await {
        let rows = batch.len();
        let batch_started = Instant::now();
        let batch_stats = processor.process_batch(batch, do_load).await?;
        stats.batches += 1;
        stats.metric_count += batch_stats.metric_count;
        stats.row_count += batch_stats.row_count;
        counters.record(batch_stats.metric_count, batch_stats.row_count);
        if log_batches {
            debug!(
                worker_id,
                rows,
                elapsed_us = batch_started.elapsed().as_micros() as u64,
                "processed batch"
            );
        }
    }
    processor.close(do_load).await?;
    debug!(worker_id, batches = stats.batches, "worker finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerKind;
    use crate::contracts::{BatchStats, DbCreator};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Semaphore;
    use tokio_test::assert_ok;

    fn sample_input(hosts: usize, points_per_host: usize) -> String {
        let mut out = String::from("tags,hostname string,region string\ncpu,usage_user,usage_idle\n\n");
        for p in 0..points_per_host {
            for h in 0..hosts {
                out.push_str(&format!("tags,hostname=host_{h},region=us-east\n"));
                out.push_str(&format!("cpu,{},1.0,2.0\n", p * 1_000 + h));
            }
        }
        out
    }

    #[derive(Default)]
    struct CreatorCalls {
        exists: bool,
        create_conflicts: bool,
    }

    struct TestCreator {
        calls: CreatorCalls,
    }

    #[async_trait]
    impl DbCreator for TestCreator {
        async fn init(&mut self, _header: &Header) -> Result<(), LoadError> {
            Ok(())
        }
        async fn db_exists(&mut self, _db_name: &str) -> Result<bool, LoadError> {
            Ok(self.calls.exists)
        }
        async fn remove_old_db(&mut self, _db_name: &str) -> Result<(), LoadError> {
            Ok(())
        }
        async fn create_db(&mut self, db_name: &str) -> Result<(), LoadError> {
            if self.calls.create_conflicts {
                Err(LoadError::backend(
                    BackendErrorKind::AlreadyExists,
                    format!("database '{db_name}' already exists"),
                ))
            } else {
                Ok(())
            }
        }
        async fn post_create_db(&mut self, _db_name: &str) -> Result<(), LoadError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), LoadError> {
            Ok(())
        }
    }

    /// Counts rows and metrics; optionally stalls on a gate or fails.
    struct TestTarget {
        exists: bool,
        create_conflicts: bool,
        gate: Option<Arc<Semaphore>>,
        fail_batches: bool,
        batches_started: Arc<AtomicU64>,
    }

    impl TestTarget {
        fn new() -> Self {
            Self {
                exists: false,
                create_conflicts: false,
                gate: None,
                fail_batches: false,
                batches_started: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    struct TestProcessor {
        gate: Option<Arc<Semaphore>>,
        fail_batches: bool,
        batches_started: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Processor for TestProcessor {
        async fn init(&mut self, _worker_id: usize, _do_load: bool) -> Result<(), LoadError> {
            Ok(())
        }

        async fn process_batch(
            &mut self,
            batch: Batch,
            _do_load: bool,
        ) -> Result<BatchStats, LoadError> {
            self.batches_started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.map_err(|_| {
                    LoadError::backend(BackendErrorKind::Operation, "gate closed")
                })?;
                permit.forget();
            }
            if self.fail_batches {
                return Err(LoadError::backend(
                    BackendErrorKind::Operation,
                    "simulated insert failure",
                ));
            }
            let metrics: u64 = batch.points().iter().map(|p| p.metric_count()).sum();
            Ok(BatchStats::new(metrics, batch.len() as u64))
        }

        async fn close(&mut self, _do_load: bool) -> Result<(), LoadError> {
            Ok(())
        }
    }

    impl Target for TestTarget {
        fn db_creator(&self) -> Box<dyn DbCreator> {
            Box::new(TestCreator {
                calls: CreatorCalls {
                    exists: self.exists,
                    create_conflicts: self.create_conflicts,
                },
            })
        }

        fn processor(&self, _header: Arc<Header>) -> Box<dyn Processor> {
            Box::new(TestProcessor {
                gate: self.gate.clone(),
                fail_batches: self.fail_batches,
                batches_started: Arc::clone(&self.batches_started),
            })
        }
    }

    fn quiet_config() -> LoadConfig {
        LoadConfig::new("bench").with_reporting_period(std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn test_single_queue_end_to_end() {
        let input = sample_input(4, 25);
        let runner = LoadRunner::new(quiet_config().with_workers(3).with_batch_size(7)).unwrap();
        let target = TestTarget::new();

        let report = assert_ok!(runner.run(&target, input.as_bytes()).await);
        assert_eq!(report.points, 100);
        assert_eq!(report.row_count, 100);
        assert_eq!(report.metric_count, 200);
        // 100 points at batch size 7: 14 full batches plus a partial.
        assert_eq!(report.batches, 15);
    }

    #[tokio::test]
    async fn test_worker_per_queue_end_to_end() {
        let input = sample_input(8, 10);
        let runner = LoadRunner::new(
            quiet_config()
                .with_workers(4)
                .with_batch_size(5)
                .with_hash_workers(),
        )
        .unwrap();
        let target = TestTarget::new();

        let report = runner.run(&target, input.as_bytes()).await.unwrap();
        assert_eq!(report.row_count, 80);
        assert_eq!(report.metric_count, 160);
    }

    #[tokio::test]
    async fn test_worker_error_fails_the_run() {
        let input = sample_input(2, 10);
        let runner = LoadRunner::new(quiet_config().with_workers(2).with_batch_size(4)).unwrap();
        let mut target = TestTarget::new();
        target.fail_batches = true;

        let err = runner.run(&target, input.as_bytes()).await.err().unwrap();
        assert!(
            matches!(
                err,
                LoadError::Backend {
                    kind: BackendErrorKind::Operation,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_abort_on_existing_database() {
        let input = sample_input(1, 1);
        let runner =
            LoadRunner::new(quiet_config().with_workers(1).with_abort_on_exist(true)).unwrap();
        let mut target = TestTarget::new();
        target.exists = true;

        let err = runner.run(&target, input.as_bytes()).await.err().unwrap();
        assert!(matches!(err, LoadError::Config(_)), "{err}");
    }

    #[tokio::test]
    async fn test_idempotent_create_is_success() {
        let input = sample_input(1, 3);
        let runner = LoadRunner::new(quiet_config().with_workers(1).with_batch_size(2)).unwrap();
        let mut target = TestTarget::new();
        target.create_conflicts = true;

        let report = assert_ok!(runner.run(&target, input.as_bytes()).await);
        assert_eq!(report.row_count, 3);
    }

    #[tokio::test]
    async fn test_backpressure_with_stalled_worker() {
        // Queue depth 1, batch size 1, one stalled worker: the first
        // batch reaches the processor and everything behind it waits
        // in bounded queues instead of accumulating.
        let input = sample_input(1, 6);
        let runner = LoadRunner::new(
            quiet_config()
                .with_workers(1)
                .with_batch_size(1)
                .with_queue_depth(1),
        )
        .unwrap();
        let mut target = TestTarget::new();
        let gate = Arc::new(Semaphore::new(0));
        target.gate = Some(Arc::clone(&gate));
        let started = Arc::clone(&target.batches_started);

        let run = tokio::spawn(async move {
            let input = input;
            runner.run(&target, input.as_bytes()).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!run.is_finished());

        gate.add_permits(6);
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.row_count, 6);
        assert_eq!(report.batches, 6);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_load() {
        let input = sample_input(2, 5);
        let runner = LoadRunner::new(
            quiet_config()
                .with_workers(1)
                .with_batch_size(3)
                .with_do_load(false)
                .with_do_create_db(false),
        )
        .unwrap();
        let target = TestTarget::new();

        let report = runner.run(&target, input.as_bytes()).await.unwrap();
        assert_eq!(report.row_count, 10);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let err = LoadRunner::new(
            quiet_config()
                .with_workers(4)
                .with_queue_mode(QueueMode::WorkerPerQueue)
                .with_indexer(IndexerKind::Constant),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LoadError::Config(_)));
    }
}

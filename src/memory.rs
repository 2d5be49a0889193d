//! In-memory reference backend.
//!
//! A complete [`Target`] implementation backed by a shared in-memory
//! store: tag tuples land in a tags dimension table keyed by surrogate
//! id, fact rows reference that id, and insert templates are memoized
//! by shape. It is the worked example for real backend crates and what
//! the CLI and the integration tests run against, no server required.

use async_trait::async_trait;
use load_core::{
    BackendErrorKind, Batch, BatchStats, DbCreator, Header, LoadError, Point, Processor,
    StatementCache, TagCache, Target,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// One row of the tags dimension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub id: i64,
    /// Common tag values in schema order.
    pub values: Vec<String>,
}

/// One fact row, referencing its tag tuple by surrogate id.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub timestamp: i64,
    pub tag_id: i64,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    databases: HashSet<String>,
    tags: Vec<TagRow>,
    facts: HashMap<String, Vec<FactRow>>,
}

/// Shared in-memory store standing in for a database server.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.lock().databases.contains(name)
    }

    fn create_database(&self, name: &str) -> Result<(), LoadError> {
        let mut inner = self.lock();
        if !inner.databases.insert(name.to_string()) {
            return Err(LoadError::backend(
                BackendErrorKind::AlreadyExists,
                format!("database '{name}' already exists"),
            ));
        }
        Ok(())
    }

    fn drop_database(&self, name: &str) {
        let mut inner = self.lock();
        inner.databases.remove(name);
        inner.tags.clear();
        inner.facts.clear();
    }

    fn create_table(&self, table: &str) {
        self.lock().facts.entry(table.to_string()).or_default();
    }

    fn insert_tags(&self, rows: Vec<TagRow>) {
        self.lock().tags.extend(rows);
    }

    fn insert_facts(&self, table: &str, rows: Vec<FactRow>) -> Result<(), LoadError> {
        let mut inner = self.lock();
        match inner.facts.get_mut(table) {
            Some(existing) => {
                existing.extend(rows);
                Ok(())
            }
            None => Err(LoadError::backend(
                BackendErrorKind::Operation,
                format!("table '{table}' does not exist"),
            )),
        }
    }

    /// Snapshot of the tags dimension table.
    pub fn tags(&self) -> Vec<TagRow> {
        self.lock().tags.clone()
    }

    /// Snapshot of one fact table, insert order preserved.
    pub fn facts(&self, table: &str) -> Vec<FactRow> {
        self.lock().facts.get(table).cloned().unwrap_or_default()
    }

    /// Total fact rows across all tables.
    pub fn fact_count(&self) -> usize {
        self.lock().facts.values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Factory wiring the memory store, the shared tag cache, and the
/// shared statement cache into processors.
pub struct MemoryTarget {
    store: Arc<MemoryStore>,
    tag_cache: Arc<TagCache>,
    statements: Arc<StatementCache<Arc<str>>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Fresh caches over an existing store, as a new loader process
    /// against a running server would start.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            tag_cache: Arc::new(TagCache::new()),
            statements: Arc::new(StatementCache::new()),
        }
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn tag_cache(&self) -> Arc<TagCache> {
        Arc::clone(&self.tag_cache)
    }

    pub fn statement_cache(&self) -> Arc<StatementCache<Arc<str>>> {
        Arc::clone(&self.statements)
    }
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for MemoryTarget {
    fn db_creator(&self) -> Box<dyn DbCreator> {
        Box::new(MemoryCreator {
            store: Arc::clone(&self.store),
            tables: Vec::new(),
        })
    }

    fn processor(&self, header: Arc<Header>) -> Box<dyn Processor> {
        Box::new(MemoryProcessor {
            store: Arc::clone(&self.store),
            tag_cache: Arc::clone(&self.tag_cache),
            statements: Arc::clone(&self.statements),
            header,
        })
    }
}

struct MemoryCreator {
    store: Arc<MemoryStore>,
    tables: Vec<String>,
}

#[async_trait]
impl DbCreator for MemoryCreator {
    async fn init(&mut self, header: &Header) -> Result<(), LoadError> {
        self.tables = header.tables().iter().map(|t| t.name.clone()).collect();
        Ok(())
    }

    async fn db_exists(&mut self, db_name: &str) -> Result<bool, LoadError> {
        Ok(self.store.database_exists(db_name))
    }

    async fn remove_old_db(&mut self, db_name: &str) -> Result<(), LoadError> {
        self.store.drop_database(db_name);
        Ok(())
    }

    async fn create_db(&mut self, db_name: &str) -> Result<(), LoadError> {
        self.store.create_database(db_name)
    }

    async fn post_create_db(&mut self, _db_name: &str) -> Result<(), LoadError> {
        for table in &self.tables {
            self.store.create_table(table);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LoadError> {
        Ok(())
    }
}

struct MemoryProcessor {
    store: Arc<MemoryStore>,
    tag_cache: Arc<TagCache>,
    statements: Arc<StatementCache<Arc<str>>>,
    header: Arc<Header>,
}

impl MemoryProcessor {
    fn process_table(&self, table: &str, points: &[Point]) -> Result<(), LoadError> {
        let keys: Vec<String> = points.iter().map(Point::tag_tuple_key).collect();

        // New tag tuples must hit the tags table before any fact row
        // referencing their id: referential integrity, not an
        // optimization.
        let new_records = self.tag_cache.assign(keys.iter().map(String::as_str));
        if !new_records.is_empty() {
            let rows = new_records
                .into_iter()
                .map(|r| TagRow {
                    id: r.id,
                    values: r.key.split(',').map(str::to_string).collect(),
                })
                .collect();
            self.store.insert_tags(rows);
        }

        let ids = self.tag_cache.resolve(keys.iter().map(String::as_str));

        let schema = self.header.table(table).ok_or_else(|| {
            LoadError::backend(
                BackendErrorKind::Operation,
                format!("batch references undeclared table '{table}'"),
            )
        })?;
        let template = self.statements.get_or_build(table, points.len(), |t, n| {
            insert_template(t, &schema.columns, n).into()
        });
        trace!(%template, rows = points.len(), "bulk insert");

        let mut facts = Vec::with_capacity(points.len());
        for (point, id) in points.iter().zip(ids) {
            let tag_id = id.ok_or_else(|| {
                LoadError::backend(
                    BackendErrorKind::Operation,
                    "tag tuple lost its surrogate id",
                )
            })?;
            facts.push(FactRow {
                timestamp: point.timestamp(),
                tag_id,
                values: point.values().to_vec(),
            });
        }
        self.store.insert_facts(table, facts)
    }
}

#[async_trait]
impl Processor for MemoryProcessor {
    async fn init(&mut self, worker_id: usize, do_load: bool) -> Result<(), LoadError> {
        trace!(worker_id, do_load, "memory processor ready");
        Ok(())
    }

    async fn process_batch(
        &mut self,
        batch: Batch,
        do_load: bool,
    ) -> Result<BatchStats, LoadError> {
        let mut stats = BatchStats::default();
        let mut by_table: HashMap<String, Vec<Point>> = HashMap::new();
        for point in batch.into_points() {
            stats.metric_count += point.metric_count();
            stats.row_count += 1;
            by_table
                .entry(point.table().to_string())
                .or_default()
                .push(point);
        }

        if do_load {
            for (table, points) in &by_table {
                self.process_table(table, points)?;
            }
        }
        Ok(stats)
    }

    async fn close(&mut self, _do_load: bool) -> Result<(), LoadError> {
        Ok(())
    }
}

/// Bulk-insert template for a (table, row count) shape, mirroring what
/// a SQL backend would prepare once and reuse.
fn insert_template(table: &str, columns: &[String], rows: usize) -> String {
    let mut placeholders = String::from("(?,?");
    for _ in columns {
        placeholders.push_str(",?");
    }
    placeholders.push(')');

    let mut out = format!(
        "INSERT INTO {table} (time,tag_id,{}) VALUES ",
        columns.join(",")
    );
    for i in 0..rows {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&placeholders);
    }
    out
}

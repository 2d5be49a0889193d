//! Memoization of backend operation templates by shape.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Caches generated operation templates keyed by (table, row count).
///
/// Templates are a function of shape only, and a shard's batches
/// converge on one row count quickly, so the cache settles at O(tables)
/// entries. A plain mutex is enough: contention is low and the
/// critical section is a map lookup.
pub struct StatementCache<T> {
    entries: Mutex<HashMap<(String, usize), T>>,
}

impl<T: Clone> StatementCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached template for `(table, row_count)`, building
    /// it with `build` exactly once per distinct key across the run.
    pub fn get_or_build<F>(&self, table: &str, row_count: usize, build: F) -> T
    where
        F: FnOnce(&str, usize) -> T,
    {
        let mut entries = self.lock();
        if let Some(template) = entries.get(&(table.to_string(), row_count)) {
            return template.clone();
        }
        let template = build(table, row_count);
        tracing::debug!(table, row_count, "statement cache: built new template");
        entries.insert((table.to_string(), row_count), template.clone());
        template
    }

    /// Number of distinct (table, row count) shapes built so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, usize), T>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> Default for StatementCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builds_once_per_shape() {
        let cache: StatementCache<String> = StatementCache::new();
        let builds = AtomicUsize::new(0);
        let build = |table: &str, n: usize| {
            builds.fetch_add(1, Ordering::SeqCst);
            format!("INSERT INTO {table} x{n}")
        };

        let a = cache.get_or_build("cpu", 100, build);
        let b = cache.get_or_build("cpu", 100, build);
        assert_eq!(a, b);
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // A new row count is a new shape.
        cache.get_or_build("cpu", 7, build);
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        // A new table is a new shape.
        cache.get_or_build("mem", 100, build);
        assert_eq!(builds.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_shared_across_threads() {
        let cache: std::sync::Arc<StatementCache<usize>> =
            std::sync::Arc::new(StatementCache::new());
        let builds = std::sync::Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = std::sync::Arc::clone(&cache);
                let builds = std::sync::Arc::clone(&builds);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.get_or_build("cpu", 500, |_, n| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            n
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}

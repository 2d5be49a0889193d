//! Decoded time-series observations.

use std::sync::Arc;

/// One decoded observation: a table name, a nanosecond timestamp, the
/// ordered common tags, any extra free-form tags, and one nullable
/// value per declared column.
///
/// Points are immutable once decoded. Column names are shared with the
/// stream header through an `Arc` so decoding a point never clones the
/// schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    table: String,
    timestamp: i64,
    tags: Vec<(String, String)>,
    extra_tags: Vec<(String, String)>,
    columns: Arc<[String]>,
    values: Vec<Option<f64>>,
}

impl Point {
    pub fn new(
        table: String,
        timestamp: i64,
        tags: Vec<(String, String)>,
        extra_tags: Vec<(String, String)>,
        columns: Arc<[String]>,
        values: Vec<Option<f64>>,
    ) -> Self {
        Self {
            table,
            timestamp,
            tags,
            extra_tags,
            columns,
            values,
        }
    }

    /// Destination table (measurement) name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Observation time in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Common tags in schema order.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Free-form tags beyond the declared schema.
    pub fn extra_tags(&self) -> &[(String, String)] {
        &self.extra_tags
    }

    /// Field values paired with their column names, in declared order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.columns
            .iter()
            .map(|c| c.as_str())
            .zip(self.values.iter().copied())
    }

    /// Raw field values in declared column order.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Number of metric values carried by this point, nulls included.
    pub fn metric_count(&self) -> u64 {
        self.values.len() as u64
    }

    /// The shard key: the value of the first schema tag (the entity
    /// identity, e.g. a hostname). Empty when the point has no tags.
    pub fn primary_tag(&self) -> &str {
        self.tags.first().map(|(_, v)| v.as_str()).unwrap_or("")
    }

    /// The common-tag tuple as a single cache key, values joined in
    /// schema order. Two points describe the same entity exactly when
    /// their tuple keys are equal.
    pub fn tag_tuple_key(&self) -> String {
        let mut key = String::new();
        for (i, (_, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(v);
        }
        key
    }
}

//! Wire protocol decoder for the serialized point stream.
//!
//! The stream is line-oriented. A header declares the tag schema and
//! the per-table columns, terminated by a blank line:
//!
//! ```text
//! tags,hostname string,region string
//! cpu,usage_user,usage_idle
//!
//! ```
//!
//! Each data point is a pair of lines: a `tags,`-prefixed line with
//! positional `key=value` pairs aligned to the tag schema (extra
//! free-form pairs may follow), and a field line carrying the table
//! name, a signed nanosecond timestamp, and one value per declared
//! column (empty value means null).
//!
//! A malformed header aborts the run: a corrupt header indicates a
//! tooling mismatch between generator and loader, not a transient
//! condition.

use crate::error::LoadError;
use crate::point::Point;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Serialized types a tag column may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    String,
    Float32,
    Float64,
    Int32,
    Int64,
}

impl TagType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(TagType::String),
            "float32" => Some(TagType::Float32),
            "float64" => Some(TagType::Float64),
            "int32" => Some(TagType::Int32),
            "int64" => Some(TagType::Int64),
            _ => None,
        }
    }
}

/// One declared tag column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagColumn {
    pub name: String,
    pub tag_type: TagType,
}

/// One declared table and its metric columns.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Arc<[String]>,
}

/// Parsed stream header: the tag schema plus every table definition.
#[derive(Debug, Clone)]
pub struct Header {
    tag_columns: Vec<TagColumn>,
    tables: Vec<TableSchema>,
    by_name: HashMap<String, usize>,
}

impl Header {
    /// Parse the header lines from the stream, consuming the blank
    /// terminator. `line_no` is advanced past every consumed line.
    async fn parse<R>(reader: &mut R, line_no: &mut u64) -> Result<Self, LoadError>
    where
        R: AsyncBufRead + Unpin,
    {
        let tags_line = match read_trimmed_line(reader, line_no).await? {
            Some(line) => line,
            None => return Err(LoadError::protocol(*line_no, "empty input, expected header")),
        };

        let mut tokens = tags_line.split(',');
        if tokens.next() != Some("tags") {
            return Err(LoadError::protocol(
                *line_no,
                format!("header must start with 'tags', got '{tags_line}'"),
            ));
        }
        let mut tag_columns = Vec::new();
        for token in tokens {
            // Generators emit either "name type" or "name=type".
            let (name, ty) = token
                .split_once(|c| c == ' ' || c == '=')
                .ok_or_else(|| {
                    LoadError::protocol(*line_no, format!("tag declaration '{token}' missing type"))
                })?;
            let tag_type = TagType::parse(ty).ok_or_else(|| {
                LoadError::protocol(*line_no, format!("unrecognized tag type '{ty}'"))
            })?;
            tag_columns.push(TagColumn {
                name: name.to_string(),
                tag_type,
            });
        }

        let mut tables = Vec::new();
        let mut by_name = HashMap::new();
        loop {
            let line = match read_trimmed_line(reader, line_no).await? {
                Some(line) => line,
                None => {
                    return Err(LoadError::protocol(
                        *line_no,
                        "header not terminated by a blank line",
                    ))
                }
            };
            if line.is_empty() {
                break;
            }
            let mut parts = line.split(',');
            let name = parts.next().unwrap_or_default().to_string();
            let columns: Vec<String> = parts.map(str::to_string).collect();
            if name.is_empty() || columns.is_empty() {
                return Err(LoadError::protocol(
                    *line_no,
                    format!("table definition '{line}' needs a name and at least one column"),
                ));
            }
            by_name.insert(name.clone(), tables.len());
            tables.push(TableSchema {
                name,
                columns: columns.into(),
            });
        }

        if tables.is_empty() {
            return Err(LoadError::protocol(*line_no, "header declares no tables"));
        }

        Ok(Header {
            tag_columns,
            tables,
            by_name,
        })
    }

    pub fn tag_columns(&self) -> &[TagColumn] {
        &self.tag_columns
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }
}

/// Streaming decoder: parses the header up front, then yields one
/// [`Point`] per data line pair until end-of-stream.
pub struct Decoder<R> {
    reader: R,
    header: Arc<Header>,
    line_no: u64,
}

impl<R> Decoder<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Consume the stream header and return a decoder positioned at
    /// the first data line.
    pub async fn new(mut reader: R) -> Result<Self, LoadError> {
        let mut line_no = 0;
        let header = Header::parse(&mut reader, &mut line_no).await?;
        Ok(Self {
            reader,
            header: Arc::new(header),
            line_no,
        })
    }

    /// The parsed stream header, shareable with collaborators.
    pub fn header(&self) -> Arc<Header> {
        Arc::clone(&self.header)
    }

    /// Decode the next point, or `None` at end-of-stream.
    pub async fn next_point(&mut self) -> Result<Option<Point>, LoadError> {
        let tag_line = match read_trimmed_line(&mut self.reader, &mut self.line_no).await? {
            Some(line) => line,
            None => return Ok(None),
        };
        let (tags, extra_tags) = self.parse_tag_line(&tag_line)?;

        let field_line = match read_trimmed_line(&mut self.reader, &mut self.line_no).await? {
            Some(line) => line,
            None => {
                return Err(LoadError::protocol(
                    self.line_no,
                    "tag line without a matching field line",
                ))
            }
        };
        let (table, timestamp, columns, values) = self.parse_field_line(&field_line)?;

        Ok(Some(Point::new(
            table, timestamp, tags, extra_tags, columns, values,
        )))
    }

    #[allow(clippy::type_complexity)]
    fn parse_tag_line(
        &self,
        line: &str,
    ) -> Result<(Vec<(String, String)>, Vec<(String, String)>), LoadError> {
        let mut tokens = line.split(',');
        if tokens.next() != Some("tags") {
            return Err(LoadError::protocol(
                self.line_no,
                format!("tag line must start with 'tags', got '{line}'"),
            ));
        }

        let schema_len = self.header.tag_columns.len();
        let mut tags = Vec::with_capacity(schema_len);
        let mut extra_tags = Vec::new();
        for (i, token) in tokens.enumerate() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                LoadError::protocol(self.line_no, format!("tag '{token}' is not key=value"))
            })?;
            if i < schema_len {
                tags.push((key.to_string(), value.to_string()));
            } else {
                extra_tags.push((key.to_string(), value.to_string()));
            }
        }
        if tags.len() < schema_len {
            return Err(LoadError::protocol(
                self.line_no,
                format!(
                    "tag line has {} values, schema declares {}",
                    tags.len(),
                    schema_len
                ),
            ));
        }
        Ok((tags, extra_tags))
    }

    #[allow(clippy::type_complexity)]
    fn parse_field_line(
        &self,
        line: &str,
    ) -> Result<(String, i64, Arc<[String]>, Vec<Option<f64>>), LoadError> {
        let mut tokens = line.split(',');
        let table_name = tokens.next().unwrap_or_default();
        let schema = self.header.table(table_name).ok_or_else(|| {
            LoadError::protocol(
                self.line_no,
                format!("field line references undeclared table '{table_name}'"),
            )
        })?;

        let ts_token = tokens.next().ok_or_else(|| {
            LoadError::protocol(self.line_no, "field line missing timestamp")
        })?;
        let timestamp: i64 = ts_token.parse().map_err(|_| {
            LoadError::protocol(
                self.line_no,
                format!("invalid nanosecond timestamp '{ts_token}'"),
            )
        })?;

        let mut values = Vec::with_capacity(schema.columns.len());
        for token in tokens {
            if token.is_empty() {
                values.push(None);
            } else {
                let value: f64 = token.parse().map_err(|_| {
                    LoadError::protocol(self.line_no, format!("invalid field value '{token}'"))
                })?;
                values.push(Some(value));
            }
        }
        if values.len() != schema.columns.len() {
            return Err(LoadError::protocol(
                self.line_no,
                format!(
                    "table '{}' declares {} columns, row has {} values",
                    schema.name,
                    schema.columns.len(),
                    values.len()
                ),
            ));
        }

        Ok((
            schema.name.clone(),
            timestamp,
            Arc::clone(&schema.columns),
            values,
        ))
    }
}

/// Read one line with the trailing newline stripped; `None` at EOF.
async fn read_trimmed_line<R>(reader: &mut R, line_no: &mut u64) -> Result<Option<String>, LoadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    *line_no += 1;
    while buf.ends_with('\n') || buf.ends_with('\r') {
        buf.pop();
    }
    Ok(Some(buf))
}

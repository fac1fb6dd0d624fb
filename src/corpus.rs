//! Line-delimited JSON input: counting, batch planning and field flattening.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Column holding the raw JSON line each row was parsed from.
pub const RAW_TEXT_COLUMN: &str = "text";

/// Separator used when lifting nested object keys into column names.
pub const KEY_SEPARATOR: char = '.';

/// Counts the non-blank lines of a JSONL file.
pub fn count_records(path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut total = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if !line.trim().is_empty() {
            total += 1;
        }
    }
    Ok(total)
}

/// Splits `total` records into `num_batches` contiguous slices.
///
/// Every batch holds `total / num_batches` records except the last one, which
/// absorbs the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    num_batches: usize,
    batch_len: usize,
}

impl BatchPlan {
    /// Builds a plan; at least one batch is required.
    pub fn new(total: usize, num_batches: usize) -> Result<Self> {
        anyhow::ensure!(num_batches > 0, "number of batches must be positive");
        Ok(Self {
            total,
            num_batches,
            batch_len: total / num_batches,
        })
    }

    /// Number of records covered by the plan.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of batches in the plan.
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Row range of batch `index`.
    pub fn range(&self, index: usize) -> Range<usize> {
        let offset = index * self.batch_len;
        let len = if index + 1 < self.num_batches {
            self.batch_len
        } else {
            self.total - offset
        };
        offset..offset + len
    }

    /// All batch ranges in order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_batches).map(|index| self.range(index))
    }
}

/// Sequential reader over the non-blank lines of a JSONL file.
pub struct RecordReader {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl RecordReader {
    /// Opens `path` for streaming.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Returns up to `count` raw lines paired with their 1-based line numbers.
    pub fn next_batch(&mut self, count: usize) -> Result<Vec<(usize, String)>> {
        let mut batch = Vec::with_capacity(count);
        while batch.len() < count {
            let Some(line) = self.lines.next() else {
                break;
            };
            self.line_no += 1;
            let line = line.with_context(|| format!("failed to read line {}", self.line_no))?;
            if line.trim().is_empty() {
                continue;
            }
            batch.push((self.line_no, line));
        }
        Ok(batch)
    }
}

/// One flattened record: ordered `(column, value)` pairs.
pub type FlatRow = Vec<(String, Option<String>)>;

/// Parses one JSON object and lifts nested fields into dotted top-level keys.
pub fn flatten_record(line: &str) -> Result<FlatRow> {
    let value: Value = serde_json::from_str(line).context("invalid JSON record")?;
    let Value::Object(object) = value else {
        anyhow::bail!("JSON record is not an object");
    };
    let mut row = Vec::with_capacity(object.len());
    flatten_into(&mut row, None, object);
    Ok(row)
}

fn flatten_into(row: &mut FlatRow, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{key}"),
            None => key,
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(row, Some(&column), nested);
            }
            Value::Null => row.push((column, None)),
            Value::String(text) => row.push((column, Some(text))),
            other => row.push((column, Some(other.to_string()))),
        }
    }
}

/// A batch of flattened rows with a stable column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl FlatBatch {
    /// Flattens raw lines; the raw text column is kept first.
    ///
    /// A record is rejected when one of its flattened keys is the raw text
    /// column or appears twice (`{"a":{"b":1},"a.b":2}`).
    pub fn from_lines(lines: Vec<(usize, String)>) -> Result<Self> {
        let mut columns = vec![RAW_TEXT_COLUMN.to_string()];
        let mut parsed = Vec::with_capacity(lines.len());
        for (line_no, line) in lines {
            let row = flatten_record(&line)
                .with_context(|| format!("failed to parse record at line {line_no}"))?;
            let mut seen = HashSet::with_capacity(row.len());
            for (column, _) in &row {
                anyhow::ensure!(
                    column != RAW_TEXT_COLUMN,
                    "record at line {line_no} has a field named {RAW_TEXT_COLUMN:?}, which collides with the raw text column"
                );
                anyhow::ensure!(
                    seen.insert(column.as_str()),
                    "record at line {line_no} flattens to the key {column:?} more than once"
                );
                if !columns.iter().any(|existing| existing == column) {
                    columns.push(column.clone());
                }
            }
            parsed.push((line, row));
        }

        let mut rows = Vec::with_capacity(parsed.len());
        for (raw, row) in parsed {
            let mut cells = vec![None; columns.len()];
            cells[0] = Some(raw);
            for (column, value) in row {
                if let Some(idx) = columns.iter().position(|existing| *existing == column) {
                    cells[idx] = value;
                }
            }
            rows.push(cells);
        }
        Ok(Self { columns, rows })
    }

    /// Column names in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).and_then(|cell| cell.as_deref()))
    }
}

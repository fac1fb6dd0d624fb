//! Arrow IPC batch files and consolidated Parquet tables.
//!
//! Batch files are Arrow IPC ("feather v2") files holding one flattened batch
//! each. Consolidation streams them back in order, projects every batch onto
//! the union of all columns and writes the full and small Parquet tables.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{new_null_array, Array, ArrayRef, AsArray, LargeStringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, UInt64Type};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::corpus::FlatBatch;

/// Synthetic row-position column of the small table.
pub const INDEX_COLUMN: &str = "index";

/// Record identifier column.
pub const ID_COLUMN: &str = "id";

/// Text columns use 64-bit offsets; a single batch of raw lines can exceed 2 GiB.
pub const TEXT_TYPE: DataType = DataType::LargeUtf8;

/// Converts a flattened batch into an all-[`TEXT_TYPE`] Arrow record batch.
pub fn to_record_batch(batch: &FlatBatch) -> Result<RecordBatch> {
    let fields: Vec<Field> = batch
        .columns()
        .iter()
        .map(|name| Field::new(name, TEXT_TYPE, true))
        .collect();
    let arrays: Vec<ArrayRef> = (0..batch.columns().len())
        .map(|idx| {
            let values: LargeStringArray = batch.column_values(idx).collect();
            Arc::new(values) as ArrayRef
        })
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .context("failed to assemble Arrow record batch")
}

/// Writes one record batch as an Arrow IPC file.
pub fn write_batch_file(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = FileWriter::try_new(BufWriter::new(file), batch.schema_ref())
        .with_context(|| format!("failed to start IPC writer for {:?}", path))?;
    writer
        .write(batch)
        .with_context(|| format!("failed to write batch to {:?}", path))?;
    writer
        .finish()
        .with_context(|| format!("failed to finalize {:?}", path))?;
    Ok(())
}

/// Reads the schema stored in an Arrow IPC file.
pub fn read_batch_schema(path: &Path) -> Result<SchemaRef> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = FileReader::try_new(BufReader::new(file), None)
        .with_context(|| format!("failed to read IPC header of {:?}", path))?;
    Ok(reader.schema())
}

/// Reads every record batch stored in an Arrow IPC file.
pub fn read_batch_file(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = FileReader::try_new(BufReader::new(file), None)
        .with_context(|| format!("failed to read IPC header of {:?}", path))?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to read batches from {:?}", path))
}

/// Ordered union of the fields of several schemas; first occurrence wins.
pub fn union_schema(schemas: &[SchemaRef]) -> Result<SchemaRef> {
    let mut fields: Vec<Field> = Vec::new();
    for schema in schemas {
        for field in schema.fields() {
            match fields.iter().find(|existing| existing.name() == field.name()) {
                Some(existing) => anyhow::ensure!(
                    existing.data_type() == field.data_type(),
                    "column {:?} has conflicting types {} and {}",
                    field.name(),
                    existing.data_type(),
                    field.data_type()
                ),
                None => fields.push(Field::new(field.name(), field.data_type().clone(), true)),
            }
        }
    }
    Ok(Arc::new(Schema::new(fields)))
}

/// Projects a batch onto `schema`, filling columns it lacks with nulls.
pub fn align_to_schema(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) => Arc::clone(column),
            None => new_null_array(field.data_type(), batch.num_rows()),
        })
        .collect();
    RecordBatch::try_new(Arc::clone(schema), columns).context("failed to align batch to schema")
}

/// Row counts and locations of the consolidated tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationSummary {
    /// Rows written to each table.
    pub rows: usize,
    /// Columns in the full table.
    pub columns: usize,
    /// Full table, when requested.
    pub full_path: Option<PathBuf>,
    /// Identifier-only table.
    pub small_path: PathBuf,
}

/// Concatenates batch files, in order, into the consolidated Parquet tables.
pub fn consolidate(
    batch_paths: &[PathBuf],
    full_path: Option<&Path>,
    small_path: &Path,
) -> Result<ConsolidationSummary> {
    let schemas = batch_paths
        .iter()
        .map(|path| read_batch_schema(path))
        .collect::<Result<Vec<_>>>()?;
    let mut schema = union_schema(&schemas)?;
    if schema.field_with_name(ID_COLUMN).is_err() {
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new(ID_COLUMN, TEXT_TYPE, true));
        schema = Arc::new(Schema::new(fields));
    }

    let mut full_writer = match full_path {
        Some(path) => Some(parquet_writer(path, Arc::clone(&schema))?),
        None => None,
    };
    let small_schema = small_schema();
    let mut small_writer = parquet_writer(small_path, Arc::clone(&small_schema))?;

    let mut rows = 0usize;
    for path in batch_paths {
        for batch in read_batch_file(path)? {
            if batch.num_rows() == 0 {
                continue;
            }
            anyhow::ensure!(
                batch.column_by_name(ID_COLUMN).is_some(),
                "batch file {:?} has rows but no {:?} column",
                path,
                ID_COLUMN
            );
            let aligned = align_to_schema(&batch, &schema)?;
            if let Some(writer) = full_writer.as_mut() {
                writer
                    .write(&aligned)
                    .context("failed to append to full table")?;
            }
            let small = project_small(&aligned, rows, &small_schema)?;
            small_writer
                .write(&small)
                .context("failed to append to small table")?;
            rows += aligned.num_rows();
        }
        tracing::debug!(path = %path.display(), rows, "consolidated batch file");
    }

    if let Some(writer) = full_writer {
        writer.close().context("failed to finalize full table")?;
    }
    small_writer
        .close()
        .context("failed to finalize small table")?;

    Ok(ConsolidationSummary {
        rows,
        columns: schema.fields().len(),
        full_path: full_path.map(Path::to_path_buf),
        small_path: small_path.to_path_buf(),
    })
}

fn small_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(INDEX_COLUMN, DataType::UInt64, false),
        Field::new(ID_COLUMN, TEXT_TYPE, true),
    ]))
}

fn project_small(batch: &RecordBatch, offset: usize, schema: &SchemaRef) -> Result<RecordBatch> {
    let start = offset as u64;
    let end = start + batch.num_rows() as u64;
    let index: ArrayRef = Arc::new(UInt64Array::from_iter_values(start..end));
    let ids = batch
        .column_by_name(ID_COLUMN)
        .ok_or_else(|| anyhow!("batch has no {:?} column", ID_COLUMN))?;
    RecordBatch::try_new(Arc::clone(schema), vec![index, Arc::clone(ids)])
        .context("failed to build small table batch")
}

fn parquet_writer(path: &Path, schema: SchemaRef) -> Result<ArrowWriter<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    ArrowWriter::try_new(BufWriter::new(file), schema, Some(props))
        .with_context(|| format!("failed to start Parquet writer for {:?}", path))
}

fn open_parquet(path: &Path, columns: &[&str]) -> Result<ParquetRecordBatchReader> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("failed to read Parquet metadata of {:?}", path))?;
    let mut indices = Vec::with_capacity(columns.len());
    for name in columns {
        let idx = builder
            .schema()
            .index_of(name)
            .with_context(|| format!("column {:?} not found in {:?}", name, path))?;
        indices.push(idx);
    }
    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
    builder
        .with_projection(mask)
        .build()
        .with_context(|| format!("failed to open Parquet reader for {:?}", path))
}

/// Reads one text column of a Parquet table in row order.
pub fn read_string_column(path: &Path, column: &str) -> Result<Vec<Option<String>>> {
    let mut values = Vec::new();
    for batch in open_parquet(path, &[column])? {
        let batch = batch.with_context(|| format!("failed to read {:?}", path))?;
        let array = string_column(&batch, column)?;
        values.extend(array.iter().map(|value| value.map(str::to_string)));
    }
    Ok(values)
}

fn string_column<'a>(batch: &'a RecordBatch, column: &str) -> Result<&'a LargeStringArray> {
    batch
        .column_by_name(column)
        .ok_or_else(|| anyhow!("column {:?} missing from batch", column))?
        .as_string_opt::<i64>()
        .ok_or_else(|| anyhow!("column {:?} is not a {} column", column, TEXT_TYPE))
}

/// Maps vector-index row positions back to record identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdLookup {
    ids: Vec<Option<String>>,
}

impl IdLookup {
    /// Loads the small table, checking that `index` matches each row position.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ids = Vec::new();
        for batch in open_parquet(path, &[INDEX_COLUMN, ID_COLUMN])? {
            let batch = batch.with_context(|| format!("failed to read {:?}", path))?;
            let index = batch
                .column_by_name(INDEX_COLUMN)
                .and_then(|column| column.as_primitive_opt::<UInt64Type>())
                .ok_or_else(|| anyhow!("{:?} has no UInt64 {:?} column", path, INDEX_COLUMN))?;
            let id = string_column(&batch, ID_COLUMN)?;
            for row in 0..batch.num_rows() {
                anyhow::ensure!(
                    index.value(row) == ids.len() as u64,
                    "row {} of {:?} carries index {}",
                    ids.len(),
                    path,
                    index.value(row)
                );
                let value = (!id.is_null(row)).then(|| id.value(row).to_string());
                ids.push(value);
            }
        }
        Ok(Self { ids })
    }

    /// Builds a lookup from identifiers already in row order.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(|id| Some(id.into())).collect(),
        }
    }

    /// Identifier stored at `position`.
    pub fn get(&self, position: usize) -> Option<&str> {
        self.ids.get(position).and_then(|id| id.as_deref())
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<Option<String>> for IdLookup {
    /// Row-ordered identifiers; `None` marks a row stored without one.
    fn from_iter<I: IntoIterator<Item = Option<String>>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// One corpus row as consumed by the indexing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusRow {
    /// Record identifier.
    pub id: String,
    /// Text to embed; empty when the source cell is null.
    pub text: String,
    /// Optional title carried into the index metadata.
    pub title: Option<String>,
}

/// Column selection for [`CorpusRowReader`].
#[derive(Debug, Clone)]
pub struct CorpusColumns {
    /// Identifier column.
    pub id: String,
    /// Column whose text gets embedded.
    pub text: String,
    /// Optional title column.
    pub title: Option<String>,
}

impl Default for CorpusColumns {
    fn default() -> Self {
        Self {
            id: ID_COLUMN.to_string(),
            text: "abstract".to_string(),
            title: Some("title".to_string()),
        }
    }
}

/// Streams `(id, text, title)` rows from the full table in row order.
pub struct CorpusRowReader {
    batches: ParquetRecordBatchReader,
    current: Option<RecordBatch>,
    row: usize,
    position: usize,
    columns: CorpusColumns,
}

impl CorpusRowReader {
    /// Opens the full table, projecting only the needed columns.
    pub fn open(path: &Path, columns: CorpusColumns) -> Result<Self> {
        let mut names = vec![columns.id.as_str(), columns.text.as_str()];
        if let Some(title) = columns.title.as_deref() {
            names.push(title);
        }
        names.dedup();
        Ok(Self {
            batches: open_parquet(path, &names)?,
            current: None,
            row: 0,
            position: 0,
            columns,
        })
    }
}

impl Iterator for CorpusRowReader {
    type Item = Result<CorpusRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = &self.current {
                if self.row < batch.num_rows() {
                    let (row, position) = (self.row, self.position);
                    self.row += 1;
                    self.position += 1;
                    return Some(extract_row(batch, row, position, &self.columns));
                }
            }
            match self.batches.next()? {
                Ok(batch) => {
                    self.current = Some(batch);
                    self.row = 0;
                }
                Err(err) => return Some(Err(anyhow!("failed to read corpus batch: {err}"))),
            }
        }
    }
}

fn extract_row(
    batch: &RecordBatch,
    row: usize,
    position: usize,
    columns: &CorpusColumns,
) -> Result<CorpusRow> {
    let cell = |array: &LargeStringArray| {
        (!array.is_null(row)).then(|| array.value(row).to_string())
    };
    let id = cell(string_column(batch, &columns.id)?)
        .ok_or_else(|| anyhow!("row {} has no identifier", position))?;
    let text = cell(string_column(batch, &columns.text)?).unwrap_or_default();
    let title = match columns.title.as_deref() {
        Some(name) => cell(string_column(batch, name)?),
        None => None,
    };
    Ok(CorpusRow { id, text, title })
}

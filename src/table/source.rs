//! The `TableSource` boundary: named tables as scan handles with predicate
//! and column pushdown.
//!
//! Ingestion and on-disk caching live outside this core; implementations
//! here are the in-memory source used for tests/embedding and a directory-
//! of-parquet source for local FIA extracts.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;

use crate::error::{EstimatorError, Result};
use crate::filter::expr::filter_record_batch;
use crate::filter::DomainExpr;
use crate::table::{concat_batches, project_columns};

/// Supplies named tables with filter/column pushdown.
pub trait TableSource: Send + Sync {
    /// Schema of a named table, without scanning rows.
    fn schema(&self, table: &str) -> Result<SchemaRef>;

    /// Scan a named table, applying column projection and a pushed-down
    /// predicate at (or as close as possible to) the storage layer.
    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
        predicate: Option<&DomainExpr>,
    ) -> Result<RecordBatch>;
}

/// In-memory table source.
///
/// Counts scan calls so tests can assert that validation failures happen
/// before any scan.
#[derive(Default)]
pub struct MemorySource {
    tables: FxHashMap<String, RecordBatch>,
    scan_calls: AtomicUsize,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named table.
    pub fn register(&mut self, name: impl Into<String>, batch: RecordBatch) {
        self.tables.insert(name.into(), batch);
    }

    /// Number of scans served so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scan_calls.load(Ordering::Relaxed)
    }
}

impl TableSource for MemorySource {
    fn schema(&self, table: &str) -> Result<SchemaRef> {
        self.tables
            .get(table)
            .map(RecordBatch::schema)
            .ok_or_else(|| EstimatorError::validation(format!("unknown table '{table}'")))
    }

    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
        predicate: Option<&DomainExpr>,
    ) -> Result<RecordBatch> {
        self.scan_calls.fetch_add(1, Ordering::Relaxed);
        let batch = self
            .tables
            .get(table)
            .ok_or_else(|| EstimatorError::validation(format!("unknown table '{table}'")))?;

        // Predicate first: it may reference columns the projection drops.
        let filtered = match predicate {
            Some(expr) => filter_record_batch(batch, &expr.evaluate(batch)?)?,
            None => batch.clone(),
        };
        match projection {
            Some(columns) => project_columns(&filtered, columns),
            None => Ok(filtered),
        }
    }
}

/// Table source over a directory holding one `<TABLE>.parquet` per table.
pub struct ParquetSource {
    dir: PathBuf,
}

impl ParquetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.parquet"))
    }

    fn reader_builder(
        path: &Path,
    ) -> Result<ParquetRecordBatchReaderBuilder<std::fs::File>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open parquet file: {}", path.display()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("Failed to read parquet file: {}", path.display()))?;
        Ok(builder)
    }
}

impl TableSource for ParquetSource {
    fn schema(&self, table: &str) -> Result<SchemaRef> {
        let builder = Self::reader_builder(&self.table_path(table))?;
        Ok(builder.schema().clone())
    }

    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
        predicate: Option<&DomainExpr>,
    ) -> Result<RecordBatch> {
        let path = self.table_path(table);
        let builder = Self::reader_builder(&path)?;
        let file_schema = builder.schema().clone();

        // The predicate is evaluated per batch below, so its columns must
        // survive the projection; missing fields are skipped with a warning
        // rather than failing the scan.
        let reader = if let Some(columns) = projection {
            let mut wanted: Vec<String> = columns.to_vec();
            if let Some(expr) = predicate {
                for col in expr.required_columns() {
                    if !wanted.contains(&col) {
                        wanted.push(col);
                    }
                }
            }
            let mut indices = Vec::new();
            for name in &wanted {
                match file_schema.index_of(name) {
                    Ok(idx) => indices.push(idx),
                    Err(_) => {
                        log::warn!("Field {name} not found in {table}.parquet, skipping");
                    }
                }
            }
            let mask = ProjectionMask::leaves(builder.parquet_schema(), indices);
            builder
                .with_projection(mask)
                .build()
                .with_context(|| format!("Failed to build parquet reader for {}", path.display()))?
        } else {
            builder
                .build()
                .with_context(|| format!("Failed to build parquet reader for {}", path.display()))?
        };

        let mut batches = Vec::new();
        let mut schema = None;
        for batch_result in reader {
            let batch = batch_result
                .with_context(|| format!("Failed to read record batch from {}", path.display()))?;
            if schema.is_none() {
                schema = Some(batch.schema());
            }
            let filtered = match predicate {
                Some(expr) => filter_record_batch(&batch, &expr.evaluate(&batch)?)?,
                None => batch,
            };
            if filtered.num_rows() > 0 {
                batches.push(filtered);
            }
        }

        let schema = match (schema, batches.first()) {
            (Some(s), _) => s,
            (None, Some(b)) => b.schema(),
            (None, None) => self.schema(table)?,
        };
        let combined = concat_batches(&schema, &batches)?;

        // Project back down to exactly the requested columns.
        match projection {
            Some(columns) => {
                let available: Vec<String> = columns
                    .iter()
                    .filter(|c| combined.schema().index_of(c).is_ok())
                    .cloned()
                    .collect();
                project_columns(&combined, &available)
            }
            None => Ok(combined),
        }
    }
}

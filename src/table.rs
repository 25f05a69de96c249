//! Feature tables (Arrow/Parquet)
//!
//! A `FeatureTable` is the on-disk handshake between the harness and the
//! external extraction/modeling backends: named `Float64` columns with
//! NaN as the missing-value sentinel, persisted as a single Parquet file.
//!
//! Write pattern is whole-table only. Split artifacts, predictions,
//! quantiles, and deviation scores all travel through this type.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::{Error, Result};

/// In-memory columnar table of `f64` values with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    rows: usize,
}

impl FeatureTable {
    /// Create a new empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named column.
    ///
    /// # Errors
    ///
    /// Returns an error if a column with the same name exists or the length
    /// differs from existing columns.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if self.names.iter().any(|n| *n == name) {
            return Err(Error::Table(format!("duplicate column '{name}'")));
        }
        if !self.columns.is_empty() && values.len() != self.rows {
            return Err(Error::Table(format!(
                "column '{name}' has {} rows, table has {}",
                values.len(),
                self.rows
            )));
        }
        self.rows = values.len();
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Ordered column names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Vec<f64>> {
        let idx = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::Table(format!("unknown column '{name}'")))?;
        Ok(&mut self.columns[idx])
    }

    /// Project the table onto the given columns, in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if any named column is absent.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let mut out = Self::new();
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| Error::Table(format!("unknown column '{name}'")))?;
            out.add_column(name.clone(), col.to_vec())?;
        }
        Ok(out)
    }

    /// Materialize a row subset, preserving column order.
    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        let mut out = Self::new();
        for (name, col) in self.names.iter().zip(&self.columns) {
            let values = indices.iter().map(|&i| col[i]).collect();
            // Names are already unique and lengths equal, cannot fail.
            let _ = out.add_column(name.clone(), values);
        }
        out
    }

    /// Whether any of the given columns contains a NaN (missing) value.
    ///
    /// # Errors
    ///
    /// Returns an error if any named column is absent.
    pub fn has_missing(&self, names: &[String]) -> Result<bool> {
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| Error::Table(format!("unknown column '{name}'")))?;
            if col.iter().any(|v| v.is_nan()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop every row containing a NaN in any column.
    ///
    /// Returns the filtered table and the number of rows dropped.
    #[must_use]
    pub fn drop_missing(&self) -> (Self, usize) {
        let keep: Vec<usize> = (0..self.rows)
            .filter(|&i| self.columns.iter().all(|c| !c[i].is_nan()))
            .collect();
        let dropped = self.rows - keep.len();
        (self.take_rows(&keep), dropped)
    }

    /// Factorize a categorical column in place: distinct values are replaced
    /// by integer codes 0..k in order of first appearance.
    ///
    /// Returns the number of distinct levels.
    ///
    /// # Errors
    ///
    /// Returns an error if the column is absent or contains missing values.
    pub fn factorize(&mut self, name: &str) -> Result<usize> {
        let col = self.column_mut(name)?;
        if col.iter().any(|v| v.is_nan()) {
            return Err(Error::Precondition(format!(
                "column '{name}' has missing values, drop them before factorizing"
            )));
        }
        let mut levels: Vec<u64> = Vec::new();
        for v in col.iter_mut() {
            let bits = v.to_bits();
            let code = match levels.iter().position(|&b| b == bits) {
                Some(i) => i,
                None => {
                    levels.push(bits);
                    levels.len() - 1
                }
            };
            #[allow(clippy::cast_precision_loss)]
            {
                *v = code as f64;
            }
        }
        Ok(levels.len())
    }

    /// Divide a numeric column by a constant, in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the column is absent or the divisor is zero
    /// or non-finite.
    pub fn scale(&mut self, name: &str, divisor: f64) -> Result<()> {
        if divisor == 0.0 || !divisor.is_finite() {
            return Err(Error::Table(format!(
                "cannot scale '{name}' by {divisor}"
            )));
        }
        let col = self.column_mut(name)?;
        for v in col.iter_mut() {
            *v /= divisor;
        }
        Ok(())
    }

    /// Partition rows into (matching, rest) by membership of a label column
    /// in `labels`. Every row lands in exactly one output.
    ///
    /// Used to separate patient rows (diagnosis codes in `labels`) from
    /// healthy rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the label column is absent.
    pub fn partition_by(&self, name: &str, labels: &[f64]) -> Result<(Self, Self)> {
        let col = self
            .column(name)
            .ok_or_else(|| Error::Table(format!("unknown column '{name}'")))?;
        let mut matching = Vec::new();
        let mut rest = Vec::new();
        for (i, v) in col.iter().enumerate() {
            if labels.iter().any(|l| l == v) {
                matching.push(i);
            } else {
                rest.push(i);
            }
        }
        Ok((self.take_rows(&matching), self.take_rows(&rest)))
    }

    /// Convert to an Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be constructed.
    pub fn to_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .names
            .iter()
            .map(|n| Field::new(n.as_str(), DataType::Float64, false))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|c| Arc::new(Float64Array::from(c.clone())) as ArrayRef)
            .collect();
        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    /// Write the table to a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let batch = self.to_batch()?;
        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Load a table from a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or any column is not
    /// `Float64`.
    pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); schema.fields().len()];
        for batch in reader {
            let batch = batch?;
            for (i, col) in columns.iter_mut().enumerate() {
                let array = batch
                    .column(i)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| {
                        Error::Table(format!(
                            "column '{}' in {} is not Float64",
                            schema.field(i).name(),
                            path.as_ref().display()
                        ))
                    })?;
                col.extend(array.values().iter().copied());
            }
        }

        let mut table = Self::new();
        for (field, col) in schema.fields().iter().zip(columns) {
            table.add_column(field.name().clone(), col)?;
        }
        Ok(table)
    }
}

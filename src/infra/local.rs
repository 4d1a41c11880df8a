//! A directory of CSV files standing in for a warehouse.
//!
//! Each dataset is a subdirectory of the root and each table one CSV file
//! inside it, with a header row naming the schema's columns.

use crate::error::LoadError;
use crate::services::warehouse::{
    DatasetRef, RowRejection, TableInfo, TableRef, Warehouse, WriteDisposition,
};
use crate::table::{Field, FieldMode, TablePayload};
use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CsvDirWarehouse {
    root: PathBuf,
}

impl CsvDirWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing `table`.
    pub fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.dataset)
            .join(format!("{}.csv", table.table))
    }

    fn io_error(table: &TableRef) -> impl FnOnce(std::io::Error) -> LoadError + '_ {
        move |source| LoadError::Io {
            table: table.to_string(),
            source,
        }
    }

    fn csv_error(table: &TableRef) -> impl FnOnce(csv::Error) -> LoadError + '_ {
        move |source| LoadError::Csv {
            table: table.to_string(),
            source,
        }
    }

    /// Counts data rows and header columns; a missing file is an empty table.
    fn read_info(&self, table: &TableRef) -> Result<TableInfo, LoadError> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(TableInfo {
                num_rows: 0,
                num_columns: 0,
            });
        }

        let mut reader = ReaderBuilder::new()
            .from_path(&path)
            .map_err(Self::csv_error(table))?;
        let num_columns = reader.headers().map_err(Self::csv_error(table))?.len();
        let mut num_rows = 0;
        for record in reader.records() {
            record.map_err(Self::csv_error(table))?;
            num_rows += 1;
        }
        Ok(TableInfo {
            num_rows,
            num_columns,
        })
    }

    /// Writes `rows` to the table file. The header is written whenever the
    /// file starts out empty.
    fn write_rows(
        &self,
        table: &TableRef,
        schema: &[Field],
        rows: &[Value],
        truncate: bool,
    ) -> Result<(), LoadError> {
        let path = self.table_path(table);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(Self::io_error(table))?;
        }

        let file_exists = !truncate && has_content(&path);
        debug!(path = %path.display(), file_exists, rows = rows.len(), "Writing CSV rows");

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&path).map_err(Self::io_error(table))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if !file_exists {
            writer
                .write_record(schema.iter().map(|f| f.name))
                .map_err(Self::csv_error(table))?;
        }
        for row in rows {
            writer
                .write_record(schema.iter().map(|f| cell(&row[f.name])))
                .map_err(Self::csv_error(table))?;
        }
        writer.flush().map_err(Self::io_error(table))?;
        Ok(())
    }
}

fn has_content(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Indices of rows with a null in a REQUIRED column.
fn missing_required(schema: &[Field], rows: &[Value]) -> Vec<RowRejection> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let field = schema
                .iter()
                .find(|f| f.mode == FieldMode::Required && row[f.name].is_null())?;
            Some(RowRejection {
                index,
                message: format!("missing required field {}", field.name),
            })
        })
        .collect()
}

#[async_trait]
impl Warehouse for CsvDirWarehouse {
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<(), LoadError> {
        let dir = self.root.join(&dataset.dataset);
        std::fs::create_dir_all(&dir).map_err(|source| LoadError::Io {
            table: dataset.dataset.clone(),
            source,
        })?;
        info!(dir = %dir.display(), "Local dataset ready");
        Ok(())
    }

    async fn create_table_if_absent(
        &self,
        table: &TableRef,
        schema: &[Field],
    ) -> Result<(), LoadError> {
        if has_content(&self.table_path(table)) {
            return Ok(());
        }
        self.write_rows(table, schema, &[], true)
    }

    async fn load_batch(
        &self,
        table: &TableRef,
        payload: &TablePayload,
        disposition: WriteDisposition,
    ) -> Result<u64, LoadError> {
        match disposition {
            WriteDisposition::Replace => {
                self.write_rows(table, &payload.schema, &payload.rows, true)?
            }
            WriteDisposition::Append => {
                self.write_rows(table, &payload.schema, &payload.rows, false)?
            }
            WriteDisposition::Fail => {
                if self.read_info(table)?.num_rows > 0 {
                    return Err(LoadError::NotEmpty {
                        table: table.to_string(),
                        attempted: payload.len(),
                    });
                }
                self.write_rows(table, &payload.schema, &payload.rows, true)?
            }
        }
        Ok(payload.len() as u64)
    }

    /// All-or-nothing per call: any row missing a required value rejects the
    /// chunk and nothing is written.
    async fn insert_rows(
        &self,
        table: &TableRef,
        schema: &[Field],
        rows: &[Value],
    ) -> Result<Vec<RowRejection>, LoadError> {
        let rejected = missing_required(schema, rows);
        if rejected.is_empty() {
            self.write_rows(table, schema, rows, false)?;
        }
        Ok(rejected)
    }

    async fn table_info(&self, table: &TableRef) -> Result<TableInfo, LoadError> {
        self.read_info(table)
    }
}

//! Trait and types for a destination analytics warehouse.

use crate::error::LoadError;
use crate::table::{Field, TablePayload};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A dataset inside a project, plus where to create it if missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
    pub location: String,
}

impl DatasetRef {
    pub fn table(&self, table: &str) -> TableRef {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.to_string(),
        }
    }
}

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// What a batch load does when the table already has rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    /// Truncate, then write.
    #[default]
    Replace,
    Append,
    /// Refuse unless the table is empty.
    Fail,
}

impl WriteDisposition {
    pub fn as_bigquery(self) -> &'static str {
        match self {
            WriteDisposition::Replace => "WRITE_TRUNCATE",
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Fail => "WRITE_EMPTY",
        }
    }
}

/// How rows travel to the warehouse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// One load job per table.
    #[default]
    Batch,
    /// Chunked streaming inserts; always appends.
    Streaming,
}

/// A row the warehouse refused during a streaming insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// Index within the submitted chunk.
    pub index: usize,
    pub message: String,
}

/// Table metadata read back after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    pub num_rows: u64,
    pub num_columns: usize,
}

/// Abstraction over the destination warehouse (BigQuery, a local directory).
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    /// Creates the dataset if it does not exist.
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<(), LoadError>;

    /// Creates the table with `schema` if it does not exist.
    async fn create_table_if_absent(
        &self,
        table: &TableRef,
        schema: &[Field],
    ) -> Result<(), LoadError>;

    /// Writes the whole payload in one call, creating the table if needed.
    /// Returns the number of rows the warehouse reports as written.
    async fn load_batch(
        &self,
        table: &TableRef,
        payload: &TablePayload,
        disposition: WriteDisposition,
    ) -> Result<u64, LoadError>;

    /// Appends one chunk of rows to an existing table. An empty result means
    /// every row was accepted.
    async fn insert_rows(
        &self,
        table: &TableRef,
        schema: &[Field],
        rows: &[Value],
    ) -> Result<Vec<RowRejection>, LoadError>;

    async fn table_info(&self, table: &TableRef) -> Result<TableInfo, LoadError>;
}

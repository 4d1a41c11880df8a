//! Writes star-schema tables to a [`Warehouse`].

use crate::error::LoadError;
use crate::services::warehouse::{DatasetRef, LoadMode, Warehouse, WriteDisposition};
use crate::table::TablePayload;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Streaming chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub mode: LoadMode,
    pub disposition: WriteDisposition,
    pub chunk_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::Batch,
            disposition: WriteDisposition::Replace,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: usize,
    pub mode: LoadMode,
}

/// Loads tables into one dataset of a warehouse.
pub struct Loader<'a, W: ?Sized> {
    warehouse: &'a W,
    dataset: DatasetRef,
    options: LoadOptions,
}

impl<'a, W: Warehouse + ?Sized> Loader<'a, W> {
    pub fn new(warehouse: &'a W, dataset: DatasetRef, options: LoadOptions) -> Self {
        Self {
            warehouse,
            dataset,
            options,
        }
    }

    /// Makes sure the destination dataset exists.
    pub async fn prepare(&self) -> Result<(), LoadError> {
        self.warehouse.ensure_dataset(&self.dataset).await
    }

    /// Writes every row of `payload` to the table it names.
    #[tracing::instrument(skip(self, payload), fields(table = %payload.name, rows = payload.len()))]
    pub async fn load(&self, payload: &TablePayload) -> Result<TableLoad, LoadError> {
        let rows = match self.options.mode {
            LoadMode::Batch => self.load_batch(payload).await?,
            LoadMode::Streaming => self.load_streaming(payload).await?,
        };

        info!(rows, mode = ?self.options.mode, "Table loaded");
        Ok(TableLoad {
            table: payload.name.clone(),
            rows,
            mode: self.options.mode,
        })
    }

    async fn load_batch(&self, payload: &TablePayload) -> Result<usize, LoadError> {
        let table = self.dataset.table(&payload.name);
        let written = self
            .warehouse
            .load_batch(&table, payload, self.options.disposition)
            .await?;

        if written as usize != payload.len() {
            warn!(
                attempted = payload.len(),
                written, "Warehouse reported a different row count than was sent"
            );
        }

        let info = self.warehouse.table_info(&table).await?;
        info!(
            table = %table,
            num_rows = info.num_rows,
            num_columns = info.num_columns,
            "Verified destination table"
        );

        Ok(written as usize)
    }

    async fn load_streaming(&self, payload: &TablePayload) -> Result<usize, LoadError> {
        if self.options.disposition != WriteDisposition::Append {
            warn!(
                disposition = ?self.options.disposition,
                "Streaming inserts always append; write disposition ignored"
            );
        }

        let table = self.dataset.table(&payload.name);
        self.warehouse
            .create_table_if_absent(&table, &payload.schema)
            .await?;

        let chunk_size = self.options.chunk_size.max(1);
        let total = payload.len();
        let mut inserted = 0;

        for (chunk_index, chunk) in payload.rows.chunks(chunk_size).enumerate() {
            let rejected = self
                .warehouse
                .insert_rows(&table, &payload.schema, chunk)
                .await?;

            if let Some(first) = rejected.first() {
                let start = chunk_index * chunk_size;
                return Err(LoadError::PartiallyRejected {
                    table: table.to_string(),
                    attempted: total,
                    inserted,
                    rejected: rejected.len(),
                    message: format!("row {}: {}", start + first.index, first.message),
                });
            }

            inserted += chunk.len();
            debug!(inserted, total, "Streamed chunk");
        }

        Ok(inserted)
    }
}

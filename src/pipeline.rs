//! Extract, clean, model and load, end to end.

use crate::clean::{CleanedTrips, DiscardCounts, clean};
use crate::config::PipelineConfig;
use crate::dimensions::{KeyOrder, StarDimensions, build_dimensions};
use crate::error::EtlError;
use crate::extract::read_trips;
use crate::facts::{FactTable, build_facts};
use crate::load::Loader;
use crate::model::RawTable;
use crate::report::RunReport;
use crate::services::warehouse::Warehouse;
use crate::table::{TablePayload, TableRow};
use serde::Serialize;
use tracing::info;

/// The modelled output of one input file.
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dimensions: StarDimensions,
    pub facts: FactTable,
}

fn payload<R: TableRow>(rows: &[R]) -> Result<TablePayload, EtlError> {
    TablePayload::from_rows(rows).map_err(|source| EtlError::Serialize {
        table: R::TABLE.to_string(),
        source,
    })
}

impl StarSchema {
    /// Every table in load order: the six dimensions, then the fact table.
    pub fn payloads(&self) -> Result<Vec<TablePayload>, EtlError> {
        let dims = &self.dimensions;
        Ok(vec![
            payload(&dims.vendor_rows())?,
            payload(&dims.datetime_rows())?,
            payload(&dims.pickup_location_rows())?,
            payload(&dims.dropoff_location_rows())?,
            payload(&dims.rate_code_rows())?,
            payload(&dims.payment_type_rows())?,
            payload(&self.facts.rows)?,
        ])
    }
}

/// Counts carried out of [`transform`] for the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformCounts {
    pub rows_read: usize,
    pub rows_cleaned: usize,
    pub discarded: DiscardCounts,
}

/// Cleans `raw` and builds the star schema from what survives.
pub fn transform(raw: &RawTable, order: KeyOrder) -> (TransformCounts, StarSchema) {
    let CleanedTrips { trips, discarded } = clean(raw);
    let dimensions = build_dimensions(&trips, order);
    let facts = build_facts(&trips, &dimensions);

    let counts = TransformCounts {
        rows_read: raw.rows.len(),
        rows_cleaned: trips.len(),
        discarded,
    };
    (counts, StarSchema { dimensions, facts })
}

/// Runs the whole pipeline against `warehouse`.
///
/// Dimensions are loaded before the fact table so a reader never sees a fact
/// whose keys are not yet present.
#[tracing::instrument(skip(config, warehouse), fields(input = %config.input.display(), dataset = %config.dataset.dataset))]
pub async fn run<W: Warehouse + ?Sized>(
    config: &PipelineConfig,
    warehouse: &W,
) -> Result<RunReport, EtlError> {
    let mut report = RunReport::start(&config.input);

    let raw = read_trips(&config.input)?;
    let (counts, schema) = transform(&raw, config.key_order);
    drop(raw);

    report.rows_read = counts.rows_read;
    report.rows_cleaned = counts.rows_cleaned;
    report.discarded = counts.discarded;
    report.referential_errors = schema.facts.referential_errors;

    let loader = Loader::new(warehouse, config.dataset.clone(), config.load);
    loader.prepare().await?;

    for payload in schema.payloads()? {
        let load = loader.load(&payload).await?;
        report.tables.push(load);
    }

    report.finish();
    info!(tables = report.tables.len(), "Pipeline complete");
    Ok(report)
}

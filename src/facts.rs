//! Fact table assembly.

use crate::dimensions::{DatetimeKey, StarDimensions};
use crate::model::Trip;
use crate::table::{Field, FieldType, TableRow};
use serde::Serialize;
use tracing::{info, warn};

/// One trip expressed through dimension references and measures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    pub trip_id: u64,
    pub vendor_key: u32,
    pub datetime_key: u32,
    pub pickup_location_key: u32,
    pub dropoff_location_key: u32,
    pub rate_code_key: u32,
    pub payment_type_key: u32,
    pub passenger_count: Option<i64>,
    pub store_and_fwd: Option<bool>,
    pub trip_distance: f64,
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub tip_amount: f64,
    pub tolls_amount: f64,
    pub improvement_surcharge: f64,
    pub congestion_surcharge: f64,
    pub airport_fee: f64,
    pub total_amount: f64,
    pub trip_duration_seconds: i64,
}

impl TableRow for FactRow {
    const TABLE: &'static str = "fact_trips";

    fn schema() -> Vec<Field> {
        vec![
            Field::required("trip_id", FieldType::Integer),
            Field::required("vendor_key", FieldType::Integer),
            Field::required("datetime_key", FieldType::Integer),
            Field::required("pickup_location_key", FieldType::Integer),
            Field::required("dropoff_location_key", FieldType::Integer),
            Field::required("rate_code_key", FieldType::Integer),
            Field::required("payment_type_key", FieldType::Integer),
            Field::nullable("passenger_count", FieldType::Integer),
            Field::nullable("store_and_fwd", FieldType::Boolean),
            Field::required("trip_distance", FieldType::Float),
            Field::required("fare_amount", FieldType::Float),
            Field::required("extra", FieldType::Float),
            Field::required("mta_tax", FieldType::Float),
            Field::required("tip_amount", FieldType::Float),
            Field::required("tolls_amount", FieldType::Float),
            Field::required("improvement_surcharge", FieldType::Float),
            Field::required("congestion_surcharge", FieldType::Float),
            Field::required("airport_fee", FieldType::Float),
            Field::required("total_amount", FieldType::Float),
            Field::required("trip_duration_seconds", FieldType::Integer),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct FactTable {
    pub rows: Vec<FactRow>,
    /// Trips dropped because a dimension lookup missed.
    pub referential_errors: usize,
}

/// Resolves every trip against the dimensions.
#[tracing::instrument(skip(trips, dims), fields(trips = trips.len()))]
pub fn build_facts(trips: &[Trip], dims: &StarDimensions) -> FactTable {
    let mut table = FactTable {
        rows: Vec::with_capacity(trips.len()),
        referential_errors: 0,
    };

    for trip in trips {
        match fact_row(trip, dims) {
            Some(row) => table.rows.push(row),
            None => {
                warn!(trip_id = trip.trip_id, "Dimension lookup missed; dropping trip");
                table.referential_errors += 1;
            }
        }
    }

    info!(
        facts = table.rows.len(),
        referential_errors = table.referential_errors,
        "Built fact table"
    );
    table
}

fn fact_row(trip: &Trip, dims: &StarDimensions) -> Option<FactRow> {
    Some(FactRow {
        trip_id: trip.trip_id,
        vendor_key: dims.vendor.key_of(&trip.vendor_code)?,
        datetime_key: dims.datetime.key_of(&DatetimeKey::of(trip))?,
        pickup_location_key: dims.pickup_location.key_of(&trip.pickup)?,
        dropoff_location_key: dims.dropoff_location.key_of(&trip.dropoff)?,
        rate_code_key: dims.rate_code.key_of(&trip.rate_code)?,
        payment_type_key: dims.payment_type.key_of(&trip.payment_type)?,
        passenger_count: trip.passenger_count,
        store_and_fwd: trip.store_and_fwd,
        trip_distance: trip.trip_distance,
        fare_amount: trip.fares.fare_amount,
        extra: trip.fares.extra,
        mta_tax: trip.fares.mta_tax,
        tip_amount: trip.fares.tip_amount,
        tolls_amount: trip.fares.tolls_amount,
        improvement_surcharge: trip.fares.improvement_surcharge,
        congestion_surcharge: trip.fares.congestion_surcharge,
        airport_fee: trip.fares.airport_fee,
        total_amount: trip.fares.total_amount,
        trip_duration_seconds: trip.duration_seconds(),
    })
}

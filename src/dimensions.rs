//! Dimension tables and surrogate-key assignment.
//!
//! Every dimension is a [`Dimension`]: the distinct natural keys drawn from the
//! cleaned trips, each mapped to a surrogate key starting at 1. Values that no
//! trip carries never appear.

use crate::model::{LocationKey, Trip};
use crate::table::{Field, FieldType, TableRow};
use chrono::{Datelike, NaiveDate, Timelike};
use clap::ValueEnum;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::info;

/// How surrogate keys are handed out. Both orders are deterministic for a
/// given input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Order of first appearance in the cleaned trips.
    #[default]
    FirstSeen,
    /// Ascending natural key; independent of row order.
    Sorted,
}

/// Distinct natural keys with their surrogate keys.
#[derive(Debug, Clone)]
pub struct Dimension<K> {
    keys: HashMap<K, u32>,
    members: Vec<K>,
}

// `keys` is derived from `members`, so member order decides equality.
impl<K: PartialEq> PartialEq for Dimension<K> {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl<K: Eq> Eq for Dimension<K> {}

impl<K: Copy + Eq + Hash + Ord> Dimension<K> {
    pub fn build(values: impl IntoIterator<Item = K>, order: KeyOrder) -> Self {
        let mut keys = HashMap::new();
        let mut members = Vec::new();
        for value in values {
            if !keys.contains_key(&value) {
                keys.insert(value, 0);
                members.push(value);
            }
        }

        if order == KeyOrder::Sorted {
            members.sort();
        }
        for (index, member) in members.iter().enumerate() {
            keys.insert(*member, index as u32 + 1);
        }

        Self { keys, members }
    }

    /// Surrogate key for `natural`, if any trip carried it.
    pub fn key_of(&self, natural: &K) -> Option<u32> {
        self.keys.get(natural).copied()
    }

    /// Whether `surrogate` names a row of this dimension.
    pub fn contains_surrogate(&self, surrogate: u32) -> bool {
        surrogate >= 1 && (surrogate as usize) <= self.members.len()
    }

    /// `(surrogate, natural)` pairs in surrogate-key order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &K)> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, member)| (index as u32 + 1, member))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Natural key of the datetime dimension: the pickup hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatetimeKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl DatetimeKey {
    pub fn of(trip: &Trip) -> Self {
        let at = trip.pickup_at;
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
        }
    }
}

/// All six dimensions of the trip star schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarDimensions {
    pub vendor: Dimension<i64>,
    pub datetime: Dimension<DatetimeKey>,
    pub pickup_location: Dimension<LocationKey>,
    pub dropoff_location: Dimension<LocationKey>,
    pub rate_code: Dimension<i64>,
    pub payment_type: Dimension<i64>,
}

/// Derives every dimension from the cleaned trips.
#[tracing::instrument(skip(trips), fields(trips = trips.len()))]
pub fn build_dimensions(trips: &[Trip], order: KeyOrder) -> StarDimensions {
    let dims = StarDimensions {
        vendor: Dimension::build(trips.iter().map(|t| t.vendor_code), order),
        datetime: Dimension::build(trips.iter().map(DatetimeKey::of), order),
        pickup_location: Dimension::build(trips.iter().map(|t| t.pickup), order),
        dropoff_location: Dimension::build(trips.iter().map(|t| t.dropoff), order),
        rate_code: Dimension::build(trips.iter().map(|t| t.rate_code), order),
        payment_type: Dimension::build(trips.iter().map(|t| t.payment_type), order),
    };

    info!(
        vendors = dims.vendor.len(),
        hours = dims.datetime.len(),
        pickup_locations = dims.pickup_location.len(),
        dropoff_locations = dims.dropoff_location.len(),
        rate_codes = dims.rate_code.len(),
        payment_types = dims.payment_type.len(),
        "Built dimensions"
    );
    dims
}

impl StarDimensions {
    pub fn vendor_rows(&self) -> Vec<VendorRow> {
        self.vendor
            .entries()
            .map(|(key, code)| VendorRow {
                vendor_key: key,
                vendor_code: *code,
                vendor_name: vendor_name(*code),
            })
            .collect()
    }

    pub fn datetime_rows(&self) -> Vec<DatetimeRow> {
        self.datetime
            .entries()
            .map(|(key, dt)| DatetimeRow {
                datetime_key: key,
                pickup_year: dt.year,
                pickup_month: dt.month,
                pickup_day: dt.day,
                pickup_hour: dt.hour,
                pickup_weekday: NaiveDate::from_ymd_opt(dt.year, dt.month, dt.day)
                    .map(|d| d.format("%A").to_string())
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn pickup_location_rows(&self) -> Vec<PickupLocationRow> {
        self.pickup_location
            .entries()
            .map(|(key, location)| {
                let (latitude, longitude, zone_id) = location_columns(location);
                PickupLocationRow {
                    pickup_location_key: key,
                    latitude,
                    longitude,
                    zone_id,
                }
            })
            .collect()
    }

    pub fn dropoff_location_rows(&self) -> Vec<DropoffLocationRow> {
        self.dropoff_location
            .entries()
            .map(|(key, location)| {
                let (latitude, longitude, zone_id) = location_columns(location);
                DropoffLocationRow {
                    dropoff_location_key: key,
                    latitude,
                    longitude,
                    zone_id,
                }
            })
            .collect()
    }

    pub fn rate_code_rows(&self) -> Vec<RateCodeRow> {
        self.rate_code
            .entries()
            .map(|(key, code)| RateCodeRow {
                rate_code_key: key,
                rate_code: *code,
                rate_code_name: rate_code_name(*code),
            })
            .collect()
    }

    pub fn payment_type_rows(&self) -> Vec<PaymentTypeRow> {
        self.payment_type
            .entries()
            .map(|(key, code)| PaymentTypeRow {
                payment_type_key: key,
                payment_type: *code,
                payment_type_name: payment_type_name(*code),
            })
            .collect()
    }
}

fn location_columns(location: &LocationKey) -> (Option<f64>, Option<f64>, Option<i64>) {
    match location {
        LocationKey::Point {
            latitude,
            longitude,
        } => (Some(latitude.0), Some(longitude.0), None),
        LocationKey::Zone(zone) => (None, None, Some(*zone)),
    }
}

/// TLC data dictionary names.
pub fn vendor_name(code: i64) -> &'static str {
    match code {
        1 => "Creative Mobile Technologies",
        2 => "VeriFone Inc.",
        _ => "Unknown",
    }
}

pub fn rate_code_name(code: i64) -> &'static str {
    match code {
        1 => "Standard rate",
        2 => "JFK",
        3 => "Newark",
        4 => "Nassau or Westchester",
        5 => "Negotiated fare",
        6 => "Group ride",
        _ => "Unknown",
    }
}

pub fn payment_type_name(code: i64) -> &'static str {
    match code {
        1 => "Credit card",
        2 => "Cash",
        3 => "No charge",
        4 => "Dispute",
        5 => "Unknown",
        6 => "Voided trip",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorRow {
    pub vendor_key: u32,
    pub vendor_code: i64,
    pub vendor_name: &'static str,
}

impl TableRow for VendorRow {
    const TABLE: &'static str = "dim_vendor";

    fn schema() -> Vec<Field> {
        vec![
            Field::required("vendor_key", FieldType::Integer),
            Field::required("vendor_code", FieldType::Integer),
            Field::required("vendor_name", FieldType::String),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatetimeRow {
    pub datetime_key: u32,
    pub pickup_year: i32,
    pub pickup_month: u32,
    pub pickup_day: u32,
    pub pickup_hour: u32,
    pub pickup_weekday: String,
}

impl TableRow for DatetimeRow {
    const TABLE: &'static str = "dim_datetime";

    fn schema() -> Vec<Field> {
        vec![
            Field::required("datetime_key", FieldType::Integer),
            Field::required("pickup_year", FieldType::Integer),
            Field::required("pickup_month", FieldType::Integer),
            Field::required("pickup_day", FieldType::Integer),
            Field::required("pickup_hour", FieldType::Integer),
            Field::required("pickup_weekday", FieldType::String),
        ]
    }
}

fn location_schema(key_column: &'static str) -> Vec<Field> {
    vec![
        Field::required(key_column, FieldType::Integer),
        Field::nullable("latitude", FieldType::Float),
        Field::nullable("longitude", FieldType::Float),
        Field::nullable("zone_id", FieldType::Integer),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickupLocationRow {
    pub pickup_location_key: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub zone_id: Option<i64>,
}

impl TableRow for PickupLocationRow {
    const TABLE: &'static str = "dim_pickup_location";

    fn schema() -> Vec<Field> {
        location_schema("pickup_location_key")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropoffLocationRow {
    pub dropoff_location_key: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub zone_id: Option<i64>,
}

impl TableRow for DropoffLocationRow {
    const TABLE: &'static str = "dim_dropoff_location";

    fn schema() -> Vec<Field> {
        location_schema("dropoff_location_key")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateCodeRow {
    pub rate_code_key: u32,
    pub rate_code: i64,
    pub rate_code_name: &'static str,
}

impl TableRow for RateCodeRow {
    const TABLE: &'static str = "dim_rate_code";

    fn schema() -> Vec<Field> {
        vec![
            Field::required("rate_code_key", FieldType::Integer),
            Field::required("rate_code", FieldType::Integer),
            Field::required("rate_code_name", FieldType::String),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentTypeRow {
    pub payment_type_key: u32,
    pub payment_type: i64,
    pub payment_type_name: &'static str,
}

impl TableRow for PaymentTypeRow {
    const TABLE: &'static str = "dim_payment_type";

    fn schema() -> Vec<Field> {
        vec![
            Field::required("payment_type_key", FieldType::Integer),
            Field::required("payment_type", FieldType::Integer),
            Field::required("payment_type_name", FieldType::String),
        ]
    }
}

//! Trip records before and after cleaning.

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// How the input file identifies pickup and dropoff places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationLayout {
    /// `pickup_longitude`/`pickup_latitude` and the dropoff pair.
    Coordinates,
    /// `PULocationID`/`DOLocationID` taxi zones.
    Zones,
}

/// One CSV row exactly as read. Every field is kept as text; the cleaner does
/// all type coercion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTrip {
    /// 1-based position of the row in the input file.
    #[serde(skip)]
    pub trip_id: u64,

    /// The record could not be read as a trip (wrong field count or bytes
    /// that are not UTF-8). Every other field is `None`.
    #[serde(skip)]
    pub unreadable: bool,

    #[serde(rename = "VendorID", alias = "vendor_id")]
    pub vendor_id: Option<String>,
    #[serde(
        rename = "tpep_pickup_datetime",
        alias = "lpep_pickup_datetime",
        alias = "pickup_datetime"
    )]
    pub pickup_datetime: Option<String>,
    #[serde(
        rename = "tpep_dropoff_datetime",
        alias = "lpep_dropoff_datetime",
        alias = "dropoff_datetime"
    )]
    pub dropoff_datetime: Option<String>,
    pub passenger_count: Option<String>,
    pub trip_distance: Option<String>,

    pub pickup_longitude: Option<String>,
    pub pickup_latitude: Option<String>,
    pub dropoff_longitude: Option<String>,
    pub dropoff_latitude: Option<String>,
    #[serde(rename = "PULocationID")]
    pub pickup_zone: Option<String>,
    #[serde(rename = "DOLocationID")]
    pub dropoff_zone: Option<String>,

    #[serde(rename = "RatecodeID", alias = "RateCodeID", alias = "rate_code")]
    pub rate_code: Option<String>,
    pub store_and_fwd_flag: Option<String>,
    pub payment_type: Option<String>,

    pub fare_amount: Option<String>,
    pub extra: Option<String>,
    pub mta_tax: Option<String>,
    pub tip_amount: Option<String>,
    pub tolls_amount: Option<String>,
    pub improvement_surcharge: Option<String>,
    pub total_amount: Option<String>,
    pub congestion_surcharge: Option<String>,
    #[serde(alias = "Airport_fee")]
    pub airport_fee: Option<String>,
}

/// The extractor's output.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub layout: LocationLayout,
    pub rows: Vec<RawTrip>,
}

/// Where a trip started or ended. Doubles as the natural key of both location
/// dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationKey {
    Point {
        latitude: OrderedFloat<f64>,
        longitude: OrderedFloat<f64>,
    },
    Zone(i64),
}

impl LocationKey {
    pub fn point(latitude: f64, longitude: f64) -> Self {
        LocationKey::Point {
            latitude: OrderedFloat(latitude),
            longitude: OrderedFloat(longitude),
        }
    }
}

/// Monetary components of a trip, all in dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fares {
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub tip_amount: f64,
    pub tolls_amount: f64,
    pub improvement_surcharge: f64,
    pub congestion_surcharge: f64,
    pub airport_fee: f64,
    pub total_amount: f64,
}

/// A trip that passed every cleaning rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub trip_id: u64,
    pub vendor_code: i64,
    pub pickup_at: NaiveDateTime,
    pub dropoff_at: NaiveDateTime,
    pub passenger_count: Option<i64>,
    pub trip_distance: f64,
    pub pickup: LocationKey,
    pub dropoff: LocationKey,
    pub rate_code: i64,
    pub store_and_fwd: Option<bool>,
    pub payment_type: i64,
    pub fares: Fares,
}

impl Trip {
    pub fn duration_seconds(&self) -> i64 {
        (self.dropoff_at - self.pickup_at).num_seconds()
    }
}

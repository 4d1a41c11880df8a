//! Type coercion and row filtering.
//!
//! The cleaner never fails as a whole: each raw row either becomes a [`Trip`]
//! or is dropped with a [`DiscardReason`] that lands in [`DiscardCounts`].

use crate::error::DiscardReason;
use crate::model::{Fares, LocationKey, LocationLayout, RawTable, RawTrip, Trip};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info};

/// Timestamp formats seen in TLC exports. `%.f` also accepts no fraction.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Number of rows dropped per reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscardCounts {
    pub malformed_record: usize,
    pub missing_identifier: usize,
    pub missing_coordinate: usize,
    pub malformed_timestamp: usize,
    pub malformed_number: usize,
    pub non_positive_duration: usize,
    pub negative_fare: usize,
    pub negative_distance: usize,
}

impl DiscardCounts {
    pub fn record(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::MalformedRecord => self.malformed_record += 1,
            DiscardReason::MissingIdentifier(_) => self.missing_identifier += 1,
            DiscardReason::MissingCoordinate(_) => self.missing_coordinate += 1,
            DiscardReason::MalformedTimestamp(_) => self.malformed_timestamp += 1,
            DiscardReason::MalformedNumber(_) => self.malformed_number += 1,
            DiscardReason::NonPositiveDuration => self.non_positive_duration += 1,
            DiscardReason::NegativeFare => self.negative_fare += 1,
            DiscardReason::NegativeDistance => self.negative_distance += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed_record
            + self.missing_identifier
            + self.missing_coordinate
            + self.malformed_timestamp
            + self.malformed_number
            + self.non_positive_duration
            + self.negative_fare
            + self.negative_distance
    }
}

/// Validated trips plus what was thrown away.
#[derive(Debug, Clone, Default)]
pub struct CleanedTrips {
    pub trips: Vec<Trip>,
    pub discarded: DiscardCounts,
}

/// Filters a raw table down to valid trips.
#[tracing::instrument(skip(table), fields(rows = table.rows.len()))]
pub fn clean(table: &RawTable) -> CleanedTrips {
    let mut out = CleanedTrips {
        trips: Vec::with_capacity(table.rows.len()),
        discarded: DiscardCounts::default(),
    };

    for raw in &table.rows {
        match validate(raw, table.layout) {
            Ok(trip) => out.trips.push(trip),
            Err(reason) => {
                debug!(trip_id = raw.trip_id, %reason, "Discarding row");
                out.discarded.record(reason);
            }
        }
    }

    info!(
        kept = out.trips.len(),
        discarded = out.discarded.total(),
        "Cleaned trips"
    );
    out
}

/// Coerces one raw row into a [`Trip`], or says why it cannot be one.
pub fn validate(raw: &RawTrip, layout: LocationLayout) -> Result<Trip, DiscardReason> {
    if raw.unreadable {
        return Err(DiscardReason::MalformedRecord);
    }
    let vendor_code = required_code(&raw.vendor_id, "VendorID")?;
    let rate_code = required_code(&raw.rate_code, "RatecodeID")?;
    let payment_type = required_code(&raw.payment_type, "payment_type")?;

    let (pickup, dropoff) = match layout {
        LocationLayout::Coordinates => (
            point(
                (&raw.pickup_latitude, "pickup_latitude"),
                (&raw.pickup_longitude, "pickup_longitude"),
            )?,
            point(
                (&raw.dropoff_latitude, "dropoff_latitude"),
                (&raw.dropoff_longitude, "dropoff_longitude"),
            )?,
        ),
        LocationLayout::Zones => (
            LocationKey::Zone(required_code(&raw.pickup_zone, "PULocationID")?),
            LocationKey::Zone(required_code(&raw.dropoff_zone, "DOLocationID")?),
        ),
    };

    let pickup_at = timestamp(&raw.pickup_datetime, "tpep_pickup_datetime")?;
    let dropoff_at = timestamp(&raw.dropoff_datetime, "tpep_dropoff_datetime")?;

    let passenger_count = code(&raw.passenger_count, "passenger_count")?;
    let trip_distance = required_number(&raw.trip_distance, "trip_distance")?;
    let fares = Fares {
        fare_amount: required_number(&raw.fare_amount, "fare_amount")?,
        extra: number(&raw.extra, "extra")?.unwrap_or(0.0),
        mta_tax: number(&raw.mta_tax, "mta_tax")?.unwrap_or(0.0),
        tip_amount: required_number(&raw.tip_amount, "tip_amount")?,
        tolls_amount: required_number(&raw.tolls_amount, "tolls_amount")?,
        improvement_surcharge: number(&raw.improvement_surcharge, "improvement_surcharge")?
            .unwrap_or(0.0),
        congestion_surcharge: number(&raw.congestion_surcharge, "congestion_surcharge")?
            .unwrap_or(0.0),
        airport_fee: number(&raw.airport_fee, "airport_fee")?.unwrap_or(0.0),
        total_amount: required_number(&raw.total_amount, "total_amount")?,
    };

    if pickup_at >= dropoff_at {
        return Err(DiscardReason::NonPositiveDuration);
    }
    if fares.fare_amount < 0.0 {
        return Err(DiscardReason::NegativeFare);
    }
    if trip_distance < 0.0 {
        return Err(DiscardReason::NegativeDistance);
    }

    let store_and_fwd = match raw.store_and_fwd_flag.as_deref() {
        Some("Y") | Some("y") => Some(true),
        Some("N") | Some("n") => Some(false),
        _ => None,
    };

    Ok(Trip {
        trip_id: raw.trip_id,
        vendor_code,
        pickup_at,
        dropoff_at,
        passenger_count,
        trip_distance,
        pickup,
        dropoff,
        rate_code,
        store_and_fwd,
        payment_type,
        fares,
    })
}

/// Parses a TLC timestamp in any of the accepted formats.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn timestamp(
    value: &Option<String>,
    field: &'static str,
) -> Result<NaiveDateTime, DiscardReason> {
    value
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(DiscardReason::MalformedTimestamp(field))
}

fn number(value: &Option<String>, field: &'static str) -> Result<Option<f64>, DiscardReason> {
    match value.as_deref() {
        None => Ok(None),
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(DiscardReason::MalformedNumber(field)),
        },
    }
}

fn required_number(value: &Option<String>, field: &'static str) -> Result<f64, DiscardReason> {
    number(value, field)?.ok_or(DiscardReason::MalformedNumber(field))
}

/// Integer codes sometimes arrive as `1.0`; anything with a fraction is rejected.
fn code(value: &Option<String>, field: &'static str) -> Result<Option<i64>, DiscardReason> {
    match number(value, field)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
        Some(_) => Err(DiscardReason::MalformedNumber(field)),
    }
}

fn required_code(value: &Option<String>, field: &'static str) -> Result<i64, DiscardReason> {
    code(value, field)?.ok_or(DiscardReason::MissingIdentifier(field))
}

fn point(
    (latitude, lat_field): (&Option<String>, &'static str),
    (longitude, lon_field): (&Option<String>, &'static str),
) -> Result<LocationKey, DiscardReason> {
    let lat = number(latitude, lat_field)?.ok_or(DiscardReason::MissingCoordinate(lat_field))?;
    let lon = number(longitude, lon_field)?.ok_or(DiscardReason::MissingCoordinate(lon_field))?;
    Ok(LocationKey::point(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(trip_id: u64) -> RawTrip {
        let s = |v: &str| Some(v.to_string());
        RawTrip {
            trip_id,
            vendor_id: s("1"),
            pickup_datetime: s("2016-03-01 00:00:00"),
            dropoff_datetime: s("2016-03-01 00:07:55"),
            passenger_count: s("1"),
            trip_distance: s("2.50"),
            pickup_longitude: s("-73.976746"),
            pickup_latitude: s("40.765152"),
            dropoff_longitude: s("-74.004265"),
            dropoff_latitude: s("40.746128"),
            rate_code: s("1"),
            store_and_fwd_flag: s("N"),
            payment_type: s("1"),
            fare_amount: s("9"),
            extra: s("0.5"),
            mta_tax: s("0.5"),
            tip_amount: s("2.05"),
            tolls_amount: s("0"),
            improvement_surcharge: s("0.3"),
            total_amount: s("12.35"),
            ..Default::default()
        }
    }

    fn table(rows: Vec<RawTrip>) -> RawTable {
        RawTable {
            layout: LocationLayout::Coordinates,
            rows,
        }
    }

    #[test]
    fn test_valid_row_is_coerced() {
        let trip = validate(&raw(7), LocationLayout::Coordinates).unwrap();

        assert_eq!(trip.trip_id, 7);
        assert_eq!(trip.vendor_code, 1);
        assert_eq!(
            trip.pickup_at,
            NaiveDate::from_ymd_opt(2016, 3, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert_eq!(trip.duration_seconds(), 475);
        assert_eq!(trip.pickup, LocationKey::point(40.765152, -73.976746));
        assert_eq!(trip.fares.fare_amount, 9.0);
        assert_eq!(trip.fares.congestion_surcharge, 0.0);
        assert_eq!(trip.store_and_fwd, Some(false));
    }

    #[test]
    fn test_unreadable_record_is_discarded() {
        let row = RawTrip {
            unreadable: true,
            ..raw(4)
        };
        assert_eq!(
            validate(&row, LocationLayout::Coordinates),
            Err(DiscardReason::MalformedRecord)
        );

        let cleaned = clean(&table(vec![raw(1), row, raw(3)]));
        assert_eq!(cleaned.trips.len(), 2);
        assert_eq!(cleaned.discarded.malformed_record, 1);
        assert_eq!(cleaned.discarded.total(), 1);
    }

    #[test]
    fn test_negative_fare_is_discarded() {
        let mut bad = raw(2);
        bad.fare_amount = Some("-5.0".into());
        let out = clean(&table(vec![raw(1), bad, raw(3)]));

        assert_eq!(out.trips.len(), 2);
        assert_eq!(out.discarded.negative_fare, 1);
        assert_eq!(out.discarded.total(), 1);
    }

    #[test]
    fn test_negative_distance_is_discarded() {
        let mut bad = raw(1);
        bad.trip_distance = Some("-0.1".into());
        assert_eq!(
            validate(&bad, LocationLayout::Coordinates),
            Err(DiscardReason::NegativeDistance)
        );
    }

    #[test]
    fn test_dropoff_not_after_pickup_is_discarded() {
        let mut same = raw(1);
        same.dropoff_datetime = same.pickup_datetime.clone();
        assert_eq!(
            validate(&same, LocationLayout::Coordinates),
            Err(DiscardReason::NonPositiveDuration)
        );

        let mut reversed = raw(2);
        reversed.dropoff_datetime = Some("2016-02-29 23:59:00".into());
        assert_eq!(
            validate(&reversed, LocationLayout::Coordinates),
            Err(DiscardReason::NonPositiveDuration)
        );
    }

    #[test]
    fn test_malformed_timestamp_is_discarded() {
        let mut bad = raw(1);
        bad.pickup_datetime = Some("yesterday".into());
        assert!(matches!(
            validate(&bad, LocationLayout::Coordinates),
            Err(DiscardReason::MalformedTimestamp(_))
        ));
    }

    #[test]
    fn test_null_coordinate_is_discarded() {
        let mut bad = raw(1);
        bad.dropoff_latitude = None;
        assert_eq!(
            validate(&bad, LocationLayout::Coordinates),
            Err(DiscardReason::MissingCoordinate("dropoff_latitude"))
        );
    }

    #[test]
    fn test_null_identifier_is_discarded() {
        let mut bad = raw(1);
        bad.payment_type = None;
        assert_eq!(
            validate(&bad, LocationLayout::Coordinates),
            Err(DiscardReason::MissingIdentifier("payment_type"))
        );
    }

    #[test]
    fn test_zone_layout_requires_zone_ids() {
        let mut row = raw(1);
        row.pickup_zone = Some("161".into());
        row.dropoff_zone = None;
        assert_eq!(
            validate(&row, LocationLayout::Zones),
            Err(DiscardReason::MissingIdentifier("DOLocationID"))
        );

        row.dropoff_zone = Some("141".into());
        let trip = validate(&row, LocationLayout::Zones).unwrap();
        assert_eq!(trip.pickup, LocationKey::Zone(161));
        assert_eq!(trip.dropoff, LocationKey::Zone(141));
    }

    #[test]
    fn test_float_codes_and_optional_fields() {
        let mut row = raw(1);
        row.rate_code = Some("1.0".into());
        row.passenger_count = None;
        row.extra = None;
        let trip = validate(&row, LocationLayout::Coordinates).unwrap();
        assert_eq!(trip.rate_code, 1);
        assert_eq!(trip.passenger_count, None);
        assert_eq!(trip.fares.extra, 0.0);

        row.rate_code = Some("1.5".into());
        assert_eq!(
            validate(&row, LocationLayout::Coordinates),
            Err(DiscardReason::MalformedNumber("RatecodeID"))
        );
    }

    #[test]
    fn test_non_numeric_measure_is_discarded() {
        let mut bad = raw(1);
        bad.tip_amount = Some("lots".into());
        assert_eq!(
            validate(&bad, LocationLayout::Coordinates),
            Err(DiscardReason::MalformedNumber("tip_amount"))
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2016-03-01 00:00:00").is_some());
        assert!(parse_timestamp("2016-03-01T00:00:00").is_some());
        assert!(parse_timestamp("2016-03-01 00:00:00.250").is_some());
        assert!(parse_timestamp("03/01/2016 12:05:00 AM").is_some());
        assert!(parse_timestamp("2016-13-01 00:00:00").is_none());
    }

    #[test]
    fn test_cleaned_rows_respect_invariants() {
        let mut rows = Vec::new();
        for i in 0..20u64 {
            let mut r = raw(i + 1);
            if i % 3 == 0 {
                r.fare_amount = Some(format!("-{i}"));
            }
            if i % 5 == 0 {
                r.dropoff_datetime = Some("2016-02-01 00:00:00".into());
            }
            rows.push(r);
        }
        let out = clean(&table(rows));

        assert_eq!(out.trips.len() + out.discarded.total(), 20);
        for trip in &out.trips {
            assert!(trip.pickup_at < trip.dropoff_at);
            assert!(trip.fares.fare_amount >= 0.0);
        }
    }
}

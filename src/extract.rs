//! Reads the raw trip CSV into memory.

use crate::error::EtlError;
use crate::model::{LocationLayout, RawTable, RawTrip};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Columns every layout needs, each with the header names accepted for it.
const REQUIRED: &[&[&str]] = &[
    &["VendorID", "vendor_id"],
    &[
        "tpep_pickup_datetime",
        "lpep_pickup_datetime",
        "pickup_datetime",
    ],
    &[
        "tpep_dropoff_datetime",
        "lpep_dropoff_datetime",
        "dropoff_datetime",
    ],
    &["passenger_count"],
    &["trip_distance"],
    &["RatecodeID", "RateCodeID", "rate_code"],
    &["payment_type"],
    &["fare_amount"],
    &["tip_amount"],
    &["tolls_amount"],
    &["total_amount"],
];

const COORDINATE_COLUMNS: &[&str] = &[
    "pickup_longitude",
    "pickup_latitude",
    "dropoff_longitude",
    "dropoff_latitude",
];

const ZONE_COLUMNS: &[&str] = &["PULocationID", "DOLocationID"];

/// Reads `path` (gzip-compressed when it ends in `.gz`) into a [`RawTable`].
///
/// # Errors
///
/// [`EtlError::DataAccess`] when the file cannot be opened, [`EtlError::Csv`]
/// when a record cannot be read, [`EtlError::Schema`] when required columns
/// are absent.
#[tracing::instrument(fields(path = %path.display()))]
pub fn read_trips(path: &Path) -> Result<RawTable, EtlError> {
    let file = File::open(path).map_err(|source| EtlError::DataAccess {
        path: path.to_path_buf(),
        source,
    })?;

    let gzipped = path.extension().and_then(|e| e.to_str()) == Some("gz");
    debug!(gzipped, "Opened input");

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    read_trips_from(reader, path)
}

/// Reads CSV trips from any reader. `path` is only used in error messages.
///
/// A record that cannot be read as a trip (too few or too many fields, or
/// bytes that are not UTF-8) is kept as an unreadable row so the cleaner can
/// count it. Only read failures and a bad header abort.
pub fn read_trips_from<R: Read>(reader: R, path: &Path) -> Result<RawTable, EtlError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().map_err(|e| csv_error(path, e))?.clone();
    let layout = check_schema(&headers, path)?;
    let byte_headers = rdr.byte_headers().map_err(|e| csv_error(path, e))?.clone();

    let mut rows = Vec::new();
    let mut unreadable = 0;
    let mut record = ByteRecord::new();
    while rdr
        .read_byte_record(&mut record)
        .map_err(|e| csv_error(path, e))?
    {
        let trip_id = rows.len() as u64 + 1;
        let parsed = if record.len() == byte_headers.len() {
            record
                .deserialize::<RawTrip>(Some(&byte_headers))
                .map_err(|e| e.to_string())
        } else {
            Err(format!(
                "expected {} fields, found {}",
                byte_headers.len(),
                record.len()
            ))
        };

        let mut row = parsed.unwrap_or_else(|error| {
            debug!(trip_id, %error, "Unreadable record");
            unreadable += 1;
            RawTrip {
                unreadable: true,
                ..RawTrip::default()
            }
        });
        row.trip_id = trip_id;
        rows.push(row);
    }

    info!(rows = rows.len(), unreadable, ?layout, "Extracted raw trips");
    Ok(RawTable { layout, rows })
}

/// Verifies the header row and picks the location layout.
///
/// Coordinates win when both location layouts are present.
pub fn check_schema(headers: &StringRecord, path: &Path) -> Result<LocationLayout, EtlError> {
    let has = |name: &str| headers.iter().any(|h| h == name);

    let mut missing: Vec<String> = REQUIRED
        .iter()
        .filter(|names| !names.iter().any(|n| has(n)))
        .map(|names| names[0].to_string())
        .collect();

    let layout = if COORDINATE_COLUMNS.iter().all(|c| has(c)) {
        Some(LocationLayout::Coordinates)
    } else if ZONE_COLUMNS.iter().all(|c| has(c)) {
        Some(LocationLayout::Zones)
    } else {
        None
    };

    match layout {
        Some(layout) if missing.is_empty() => Ok(layout),
        _ => {
            if layout.is_none() {
                // Report whichever layout is closer to complete.
                let coords_present = COORDINATE_COLUMNS.iter().filter(|c| has(c)).count();
                let candidates = if coords_present > 0 {
                    COORDINATE_COLUMNS
                } else {
                    ZONE_COLUMNS
                };
                missing.extend(
                    candidates
                        .iter()
                        .filter(|c| !has(c))
                        .map(|c| c.to_string()),
                );
            }
            Err(EtlError::Schema {
                path: path.to_path_buf(),
                missing,
            })
        }
    }
}

fn csv_error(path: &Path, source: csv::Error) -> EtlError {
    // Underlying read failures are data-access problems, not malformed CSV.
    if source.is_io_error() {
        return EtlError::DataAccess {
            path: path.to_path_buf(),
            source: std::io::Error::other(source),
        };
    }
    EtlError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

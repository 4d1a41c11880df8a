//! Error types for the taxi star-schema pipeline.
//!
//! File-level and load-level failures abort a run and surface as [`EtlError`].
//! Row-level problems never do: they are expressed as a [`DiscardReason`] and
//! counted by the cleaner.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Input file missing or unreadable.
    #[error("failed to read input {path}: {source}")]
    DataAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input file readable but not valid CSV.
    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Required columns absent from the header row.
    #[error("{path} is missing required columns: {}", missing.join(", "))]
    Schema { path: PathBuf, missing: Vec<String> },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to serialize rows for {table}: {source}")]
    Serialize {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by a warehouse while writing a table.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The warehouse refused the table or the whole payload.
    #[error("loading {attempted} rows into {table} failed: {message}")]
    Rejected {
        table: String,
        attempted: usize,
        message: String,
    },

    /// Some streamed rows were rejected. Nothing is retried.
    #[error(
        "{rejected} of {attempted} rows rejected by {table} ({inserted} inserted before the failure): {message}"
    )]
    PartiallyRejected {
        table: String,
        attempted: usize,
        inserted: usize,
        rejected: usize,
        message: String,
    },

    /// `Fail` disposition and the destination already holds rows.
    #[error("table {table} already contains data; refusing to write {attempted} rows")]
    NotEmpty { table: String, attempted: usize },

    #[error("warehouse request for {table} failed: {source}")]
    Http {
        table: String,
        #[source]
        source: reqwest::Error,
    },

    /// The access token would lapse before the load job finishes.
    #[error("access token expired after {waited_secs}s waiting on the load job for {table}")]
    TokenExpired { table: String, waited_secs: u64 },

    #[error("local warehouse I/O for {table} failed: {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("local warehouse CSV for {table} failed: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },

    #[error("invalid warehouse URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("load job for {table} did not finish within {waited_secs}s")]
    Timeout { table: String, waited_secs: u64 },
}

/// Why the cleaner dropped a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscardReason {
    #[error("record does not match the header or is not valid UTF-8")]
    MalformedRecord,

    #[error("required identifier `{0}` is null")]
    MissingIdentifier(&'static str),

    #[error("coordinate `{0}` is null")]
    MissingCoordinate(&'static str),

    #[error("timestamp `{0}` is missing or malformed")]
    MalformedTimestamp(&'static str),

    #[error("field `{0}` is not a number")]
    MalformedNumber(&'static str),

    #[error("pickup is not before dropoff")]
    NonPositiveDuration,

    #[error("fare is negative")]
    NegativeFare,

    #[error("distance is negative")]
    NegativeDistance,
}

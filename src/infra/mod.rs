pub mod bigquery;
pub mod local;

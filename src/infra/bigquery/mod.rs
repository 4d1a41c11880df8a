//! Google BigQuery as a [`Warehouse`](crate::services::warehouse::Warehouse).

pub mod auth;
mod client;
pub mod job;

pub use auth::{AuthError, ServiceAccountKey};
pub use client::BigQueryClient;

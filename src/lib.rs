pub mod clean;
pub mod config;
pub mod dimensions;
pub mod error;
pub mod extract;
pub mod facts;
pub mod http;
pub mod infra;
pub mod load;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod table;

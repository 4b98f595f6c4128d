//! Driver connections
//!
//! This module handles:
//! * The connector seam the pool opens connections through
//! * The tokio-postgres implementation of that seam (TLS via rustls)
//! * Mapping JSON parameters and result rows to and from Postgres types

mod driver;
mod postgres;
mod value;

pub use driver::{Connector, DriverConnection, QueryResult, Row};
pub use postgres::{map_driver_error, PostgresConnector};
pub use value::{row_to_map, JsonColumn, SqlParam};

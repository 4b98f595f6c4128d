//! Configuration
//!
//! This module handles:
//! * Snapshotting environment settings
//! * Connection URL parsing
//! * Resolving settings and trust mode into an immutable pool configuration

mod builder;
mod connection_string;
mod env;

pub use builder::{
    ConnectionTarget, PoolConfig, PoolConfigBuilder, PoolLimits, TargetSource,
    DEFAULT_DISCRETE_DATABASE, DEFAULT_DISCRETE_PORT, MAX_POOL_CONNECTIONS,
};
pub use connection_string::{ConnectionInfo, DEFAULT_URL_PORT};
pub use env::{keys, Settings};

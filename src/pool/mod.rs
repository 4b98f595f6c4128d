//! Pooling
//!
//! This module handles:
//! * The bounded connection pool and its checkout handles
//! * The registry holding the process-wide current pool

#[allow(clippy::module_inception)]
mod pool;
mod registry;

pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
pub use registry::{ErrorReport, HealthReport, PoolRegistry};

//! # pg-trustpool
//!
//! TLS-aware Postgres connection pooling for many short-lived callers in one
//! process.
//!
//! Connections are configured from environment-style settings (a URL or
//! discrete host/user/password keys) and a CA bundle that may arrive in
//! messy shape: CRLF line endings, several certificates glued together,
//! truncated blocks. The pool starts out validating server certificates
//! against that bundle. The first certificate-chain failure downgrades the
//! process to relaxed trust, once and for good, and the pool is rebuilt so
//! the next call succeeds. Operators are told through diagnostics that the
//! bundle needs fixing.
//!
//! ## Features
//!
//! - Bounded pool with FIFO waiting and a single acquire timeout
//! - Lazily built, process-wide current pool with safe swaps
//! - One-way strict-to-relaxed trust downgrade
//! - Typed diagnostic events, `tracing` logs and `metrics` counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use pg_trustpool::PoolRegistry;
//! use serde_json::json;
//!
//! let registry = PoolRegistry::from_env();
//! let result = registry
//!     .query("select id, email from users where id = $1", &[json!(42)])
//!     .await?;
//!
//! for row in &result.rows {
//!     println!("{}", row["email"]);
//! }
//!
//! registry.teardown().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod tls;

// Configuration
pub use config::{ConnectionTarget, PoolConfig, PoolConfigBuilder, PoolLimits, Settings};

// Driver seam
pub use connection::{Connector, DriverConnection, PostgresConnector, QueryResult, Row};

// Diagnostics
pub use diagnostics::{Diagnostics, DiagnosticsSink, PoolEvent, RemovalReason, TracingSink};

// Error types
pub use error::{Error, ErrorKind, Result};

// Pool types
pub use pool::{
    HealthReport, Pool, PoolBuilder, PoolMetrics, PoolRegistry, PoolStatus, PooledConnection,
};

// TLS
pub use tls::{CertificateBundle, SslMode, TrustMode, TrustModeStateMachine};

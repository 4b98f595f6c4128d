//! Error types for pool management

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for pool operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Required connection settings are missing and no URL was given
    #[error("missing required database settings: {}", keys.join(", "))]
    MissingConfig {
        /// Environment keys that were absent or empty
        keys: Vec<String>,
    },

    /// A CA bundle entry could not be decoded.
    ///
    /// Never fatal: the entry is dropped from the trust list and the
    /// error is only reported through diagnostics.
    #[error("malformed CA certificate: {0}")]
    Certificate(String),

    /// Server certificate chain is not trusted by the configured CA bundle
    #[error("TLS trust failure: {0}")]
    TlsTrust(String),

    /// Any other TLS failure (hostname mismatch, protocol error)
    #[error("TLS error: {0}")]
    Tls(String),

    /// No connection became available within the connection timeout
    #[error("timed out after {}ms waiting for a connection", waited.as_millis())]
    Timeout {
        /// How long the caller waited
        waited: Duration,
    },

    /// Statement rejected or failed on the server
    #[error("query failed: {message} (SQLSTATE {code})")]
    Query {
        /// SQLSTATE code
        code: String,
        /// Severity reported by the server (ERROR, FATAL, ...)
        severity: String,
        /// Primary message
        message: String,
        /// Optional detail
        detail: Option<String>,
        /// Optional hint
        hint: Option<String>,
    },

    /// Driver or transport failure while connecting or executing
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Pool has been ended
    #[error("connection pool is closed")]
    PoolClosed,
}

/// Coarse classification of [`Error`], used for diagnostics and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration problem
    Config,
    /// Malformed certificate material
    Certificate,
    /// Chain validation failure
    TlsTrust,
    /// Other TLS failure
    Tls,
    /// Acquire timeout
    Timeout,
    /// Server-side statement failure
    Query,
    /// Transport/driver failure
    Connection,
    /// Pool already ended
    PoolClosed,
}

impl ErrorKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Certificate => "certificate",
            Self::TlsTrust => "tls_trust",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Query => "query",
            Self::Connection => "connection",
            Self::PoolClosed => "pool_closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::MissingConfig { .. } => ErrorKind::Config,
            Error::Certificate(_) => ErrorKind::Certificate,
            Error::TlsTrust(_) => ErrorKind::TlsTrust,
            Error::Tls(_) => ErrorKind::Tls,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Query { .. } => ErrorKind::Query,
            Error::Connection(_) | Error::Io(_) => ErrorKind::Connection,
            Error::PoolClosed => ErrorKind::PoolClosed,
        }
    }

    /// Whether this error should trigger the strict-to-relaxed trust downgrade
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Error::TlsTrust(_))
    }

    /// SQLSTATE code for query errors
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_names_keys() {
        let err = Error::MissingConfig {
            keys: vec!["POSTGRES_HOST".into(), "POSTGRES_PASSWORD".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("POSTGRES_HOST"));
        assert!(msg.contains("POSTGRES_PASSWORD"));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::TlsTrust("x".into()).kind(), ErrorKind::TlsTrust);
        assert_eq!(
            Error::Timeout {
                waited: Duration::from_millis(5)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::PoolClosed.kind(), ErrorKind::PoolClosed);
        let io = Error::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_only_trust_errors_trigger_downgrade() {
        assert!(Error::TlsTrust("unknown issuer".into()).is_trust_failure());
        assert!(!Error::Tls("name mismatch".into()).is_trust_failure());
        assert!(!Error::Connection("refused".into()).is_trust_failure());
    }

    #[test]
    fn test_query_error_keeps_server_fields() {
        let err = Error::Query {
            code: "42P01".into(),
            severity: "ERROR".into(),
            message: "relation \"nope\" does not exist".into(),
            detail: None,
            hint: Some("check the table name".into()),
        };
        assert_eq!(err.sqlstate(), Some("42P01"));
        assert!(err.to_string().contains("42P01"));
        assert_eq!(ErrorKind::Query.to_string(), "query");
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            waited: Duration::from_millis(5000),
        };
        assert_eq!(err.to_string(), "timed out after 5000ms waiting for a connection");
    }
}

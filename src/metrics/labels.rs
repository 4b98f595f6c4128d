//! Metric names and label values

/// Physical connections opened
pub const CONNECTIONS_OPENED: &str = "pg_trustpool_connections_opened_total";
/// Physical connections removed from the pool
pub const CONNECTIONS_REMOVED: &str = "pg_trustpool_connections_removed_total";
/// Successful checkouts
pub const CHECKOUTS: &str = "pg_trustpool_checkouts_total";
/// Errors observed by the pool, by kind
pub const ERRORS: &str = "pg_trustpool_errors_total";
/// Trust-mode downgrades
pub const TRUST_DOWNGRADES: &str = "pg_trustpool_trust_downgrades_total";
/// Time spent waiting in `acquire`
pub const ACQUIRE_WAIT_MS: &str = "pg_trustpool_acquire_wait_ms";

/// Label: trust mode
pub const LABEL_TRUST_MODE: &str = "trust_mode";
/// Label: removal reason
pub const LABEL_REASON: &str = "reason";
/// Label: error kind
pub const LABEL_KIND: &str = "kind";
/// Label: whether a checkout reused an idle connection
pub const LABEL_REUSED: &str = "reused";

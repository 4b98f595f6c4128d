//! Diagnostic events
//!
//! The pool, the registry and the trust state machine report what they do
//! as [`PoolEvent`]s. Observers implement [`DiagnosticsSink`]; [`Diagnostics`]
//! fans events out to every registered sink. Sinks are pure observers: a
//! sink that panics is isolated and the triggering operation proceeds as if
//! nothing happened.

use crate::error::ErrorKind;
use crate::tls::TrustMode;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Why a physical connection left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Idle longer than the idle timeout
    IdleTimeout,
    /// Driver reported the connection closed
    Closed,
    /// Pool was ended
    PoolEnded,
}

impl RemovalReason {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle_timeout",
            Self::Closed => "closed",
            Self::PoolEnded => "pool_ended",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event reported by the pool subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A pool was constructed
    PoolCreated {
        /// Target host
        host: String,
        /// Trust mode the pool runs in
        trust_mode: TrustMode,
        /// Connection limit
        max_connections: usize,
        /// Number of CA certificates attached
        ca_certificates: usize,
    },
    /// A physical connection was established
    Connected {
        /// Pool-local connection id
        connection_id: u64,
        /// Target host
        host: String,
        /// Trust mode used for the handshake
        trust_mode: TrustMode,
        /// Whether the connection is TLS-encrypted
        tls: bool,
    },
    /// A caller checked out a connection
    Acquired {
        /// Pool-local connection id
        connection_id: u64,
        /// Time spent in `acquire`
        waited: Duration,
        /// Whether an idle connection was reused
        reused: bool,
    },
    /// A physical connection left the pool
    Removed {
        /// Pool-local connection id
        connection_id: u64,
        /// Why it was removed
        reason: RemovalReason,
    },
    /// An operation failed
    Error {
        /// Error classification
        kind: ErrorKind,
        /// Rendered error
        detail: String,
    },
    /// Trust mode moved from strict to relaxed
    TrustDowngraded {
        /// Mode before the transition
        from: TrustMode,
        /// Mode after the transition
        to: TrustMode,
        /// Error that triggered it
        reason: String,
    },
    /// A pool finished ending
    PoolEnded {
        /// Target host
        host: String,
    },
}

/// Receiver of pool events.
///
/// Implementations run inline on the reporting task and must not block.
pub trait DiagnosticsSink: Send + Sync {
    /// Handle one event
    fn emit(&self, event: &PoolEvent);
}

/// Fan-out handle shared by every component of one registry
#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl Diagnostics {
    /// No sinks at all
    pub fn none() -> Self {
        Self::default()
    }

    /// Only the [`TracingSink`]
    pub fn tracing() -> Self {
        Self::none().with_sink(Arc::new(TracingSink))
    }

    /// Add a sink
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of registered sinks
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver `event` to every sink
    pub fn emit(&self, event: PoolEvent) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.emit(&event))).is_err() {
                tracing::debug!("diagnostics sink panicked; event dropped for that sink");
            }
        }
    }

    /// Shorthand for [`PoolEvent::Error`]
    pub fn error(&self, err: &crate::Error) {
        self.emit(PoolEvent::Error {
            kind: err.kind(),
            detail: err.to_string(),
        });
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Sink writing structured `tracing` records and `metrics` samples
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, event: &PoolEvent) {
        match event {
            PoolEvent::PoolCreated {
                host,
                trust_mode,
                max_connections,
                ca_certificates,
            } => {
                tracing::info!(
                    host = %host,
                    trust_mode = %trust_mode,
                    max = max_connections,
                    ca_certificates = ca_certificates,
                    "connection pool created"
                );
            }
            PoolEvent::Connected {
                connection_id,
                host,
                trust_mode,
                tls,
            } => {
                tracing::info!(
                    connection_id = connection_id,
                    host = %host,
                    trust_mode = %trust_mode,
                    tls = tls,
                    "connection established"
                );
                crate::metrics::counters::connection_opened(trust_mode.as_str());
            }
            PoolEvent::Acquired {
                connection_id,
                waited,
                reused,
            } => {
                tracing::trace!(
                    connection_id = connection_id,
                    waited_ms = waited.as_millis() as u64,
                    reused = reused,
                    "connection acquired"
                );
                crate::metrics::counters::checkout(*reused);
                crate::metrics::histograms::acquire_wait(*waited);
            }
            PoolEvent::Removed {
                connection_id,
                reason,
            } => {
                tracing::debug!(
                    connection_id = connection_id,
                    reason = %reason,
                    "connection removed"
                );
                crate::metrics::counters::connection_removed(reason.as_str());
            }
            PoolEvent::Error { kind, detail } => {
                tracing::warn!(kind = %kind, "pool error: {}", detail);
                crate::metrics::counters::error(kind.as_str());
            }
            PoolEvent::TrustDowngraded { from, to, reason } => {
                tracing::error!(
                    from = %from,
                    to = %to,
                    reason = %reason,
                    "TLS certificate chain validation failed; continuing WITHOUT chain validation. \
                     Rotate the CA bundle and restart the process to restore strict validation"
                );
                crate::metrics::counters::trust_downgraded();
            }
            PoolEvent::PoolEnded { host } => {
                tracing::info!(host = %host, "connection pool ended");
            }
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PoolEvent>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event received so far
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Number of events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&PoolEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, event: &PoolEvent) {
        self.events.lock().push(event.clone());
    }
}

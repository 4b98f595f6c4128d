//! Connection pool implementation.
//!
//! A bounded set of driver connections. Slots are handed out by a fair
//! semaphore, so callers waiting for a connection are served in arrival
//! order. Returned connections go to an idle queue and are reused until they
//! outlive the idle timeout.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::connection::{Connector, DriverConnection, QueryResult};
use crate::diagnostics::{Diagnostics, PoolEvent, RemovalReason};
use crate::tls::{TrustMode, TrustModeStateMachine};
use crate::{Error, Result};

/// A bounded pool of Postgres connections.
///
/// Cloning is cheap; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(config, Arc::new(PostgresConnector::new()))
///     .diagnostics(Diagnostics::tracing())
///     .build();
///
/// let result = pool.query("select $1::int4 as n", &[json!(1)]).await?;
/// pool.end().await;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    diagnostics: Diagnostics,

    /// Receives trust failures seen while connecting.
    trust: Option<Arc<TrustModeStateMachine>>,

    /// One permit per connection slot.
    slots: Arc<Semaphore>,

    /// Connections ready for reuse, most recently returned at the back.
    idle: Mutex<VecDeque<IdleConnection>>,

    total: AtomicUsize,
    in_use: AtomicUsize,
    waiting: AtomicUsize,

    ended: AtomicBool,

    /// Signalled when the last checked-out connection comes back.
    returned: Notify,

    next_connection_id: AtomicU64,

    created_at: Instant,

    metrics: Mutex<PoolMetricsInner>,
}

/// Initial idle queue capacity; the queue grows past it on demand
const IDLE_QUEUE_CAPACITY: usize = 16;

/// Shortest interval between background idle sweeps
const MIN_REAP_PERIOD: Duration = Duration::from_millis(10);

struct IdleConnection {
    id: u64,
    conn: Box<dyn DriverConnection>,
    since: Instant,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    timeouts: u64,
}

impl Pool {
    /// Start building a pool for `config`, connecting through `connector`
    pub fn builder(config: PoolConfig, connector: Arc<dyn Connector>) -> PoolBuilder {
        PoolBuilder::new(config, connector)
    }

    /// Check out a connection.
    ///
    /// Reuses an idle connection when one is available, otherwise opens a
    /// new one if the pool is below its limit, otherwise waits in line. The
    /// whole call, waiting and connecting included, is bounded by the
    /// configured connection timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool has been ended
    /// - [`Error::Timeout`] if no connection became available in time, or
    ///   the pool was ended while waiting
    /// - connect errors from the [`Connector`]
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        if inner.ended.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + inner.config.connection_timeout();

        let permit = {
            let _waiting = WaitingGuard::new(&inner.waiting);
            tokio::time::timeout_at(deadline, inner.slots.clone().acquire_owned()).await
        };
        let permit = match permit {
            Ok(Ok(permit)) => permit,
            // Elapsed, or the semaphore was closed by end()
            Ok(Err(_)) | Err(_) => {
                return Err(inner.checkout_failed(Error::Timeout {
                    waited: started.elapsed(),
                }))
            }
        };

        inner.reap_idle();

        if let Some(idle) = inner.pop_idle() {
            return Ok(PoolInner::check_out(inner, idle.id, idle.conn, permit, started, true));
        }

        let id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let conn = match tokio::time::timeout_at(deadline, inner.connector.connect(&inner.config)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                inner.observe_connect_failure(&err);
                return Err(inner.checkout_failed(err));
            }
            Err(_) => {
                return Err(inner.checkout_failed(Error::Timeout {
                    waited: started.elapsed(),
                }))
            }
        };

        inner.total.fetch_add(1, Ordering::AcqRel);
        inner.metrics.lock().connections_created += 1;
        inner.diagnostics.emit(PoolEvent::Connected {
            connection_id: id,
            host: inner.config.target().host.clone(),
            trust_mode: inner.config.trust_mode(),
            tls: conn.is_tls(),
        });

        if inner.ended.load(Ordering::Acquire) {
            drop(conn);
            inner.discard(id, RemovalReason::PoolEnded);
            return Err(inner.checkout_failed(Error::PoolClosed));
        }

        Ok(PoolInner::check_out(inner, id, conn, permit, started, false))
    }

    /// Return a connection early. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Acquire, run one statement, release.
    ///
    /// # Errors
    ///
    /// Acquire errors, or [`Error::Query`] with the server's fields.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = self.acquire().await?;
        conn.query(sql, params).await
    }

    /// Shut the pool down.
    ///
    /// Pending waiters are released with [`Error::Timeout`], idle
    /// connections are closed, and checked-out connections are closed as
    /// they come back. Waits at most the connection timeout for them.
    /// Calling it again does nothing.
    pub async fn end(&self) {
        let inner = &self.inner;
        if inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }

        inner.slots.close();
        inner.drain_idle();

        let grace = inner.config.connection_timeout();
        if tokio::time::timeout(grace, inner.wait_returned()).await.is_err() {
            tracing::warn!(
                in_use = inner.in_use.load(Ordering::Acquire),
                "connections still checked out after end(); closing them on return"
            );
        }

        // A release racing with the first drain may have re-queued one
        inner.drain_idle();

        inner.diagnostics.emit(PoolEvent::PoolEnded {
            host: inner.config.target().host.clone(),
        });
    }

    /// Close idle connections older than the idle timeout (or already
    /// closed). Returns how many were removed.
    pub fn reap_idle(&self) -> usize {
        self.inner.reap_idle()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let idle = inner.idle.lock().len();
        PoolStatus {
            total: inner.total.load(Ordering::Acquire),
            idle,
            in_use: inner.in_use.load(Ordering::Acquire),
            waiting: inner.waiting.load(Ordering::Acquire),
            max: inner.config.max_connections(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            timeouts: inner.timeouts,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Trust mode the pool's connections are made with
    #[must_use]
    pub fn trust_mode(&self) -> TrustMode {
        self.inner.config.trust_mode()
    }

    /// Check if the pool has been ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Whether `self` and `other` are handles to the same pool
    #[must_use]
    pub fn ptr_eq(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("host", &self.inner.config.target().host)
            .field("trust_mode", &self.trust_mode())
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    fn check_out(
        this: &Arc<PoolInner>,
        id: u64,
        conn: Box<dyn DriverConnection>,
        permit: OwnedSemaphorePermit,
        started: Instant,
        reused: bool,
    ) -> PooledConnection {
        this.in_use.fetch_add(1, Ordering::AcqRel);
        this.metrics.lock().checkouts_successful += 1;
        this.diagnostics.emit(PoolEvent::Acquired {
            connection_id: id,
            waited: started.elapsed(),
            reused,
        });
        tracing::trace!(connection_id = id, reused, "connection checked out");

        PooledConnection {
            conn: Some(conn),
            id,
            pool: Arc::clone(this),
            _permit: permit,
        }
    }

    fn checkout_failed(&self, err: Error) -> Error {
        {
            let mut metrics = self.metrics.lock();
            metrics.checkouts_failed += 1;
            if matches!(err, Error::Timeout { .. }) {
                metrics.timeouts += 1;
            }
        }
        self.diagnostics.error(&err);
        err
    }

    fn observe_connect_failure(&self, err: &Error) {
        if !self.config.trust_mode().validates_chain() {
            return;
        }
        if let Some(trust) = &self.trust {
            trust.observe(err);
        }
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().pop_back()
    }

    fn release(&self, id: u64, conn: Box<dyn DriverConnection>) {
        let reason = if self.ended.load(Ordering::Acquire) {
            Some(RemovalReason::PoolEnded)
        } else if conn.is_closed() {
            Some(RemovalReason::Closed)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                drop(conn);
                self.discard(id, reason);
            }
            None => {
                tracing::trace!(connection_id = id, "connection returned to pool");
                self.idle.lock().push_back(IdleConnection {
                    id,
                    conn,
                    since: Instant::now(),
                });
            }
        }

        if self.in_use.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.returned.notify_waiters();
        }
    }

    fn discard(&self, id: u64, reason: RemovalReason) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.metrics.lock().connections_closed += 1;
        self.diagnostics.emit(PoolEvent::Removed {
            connection_id: id,
            reason,
        });
    }

    fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let removed: Vec<(IdleConnection, RemovalReason)> = {
            let mut idle = self.idle.lock();
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut removed = Vec::new();
            for conn in idle.drain(..) {
                if conn.since.elapsed() >= idle_timeout {
                    removed.push((conn, RemovalReason::IdleTimeout));
                } else if conn.conn.is_closed() {
                    removed.push((conn, RemovalReason::Closed));
                } else {
                    kept.push_back(conn);
                }
            }
            *idle = kept;
            removed
        };

        let count = removed.len();
        for (conn, reason) in removed {
            self.discard(conn.id, reason);
        }
        count
    }

    fn drain_idle(&self) {
        let drained: Vec<IdleConnection> = self.idle.lock().drain(..).collect();
        for conn in drained {
            self.discard(conn.id, RemovalReason::PoolEnded);
        }
    }

    async fn wait_returned(&self) {
        loop {
            let returned = self.returned.notified();
            if self.in_use.load(Ordering::Acquire) == 0 {
                return;
            }
            returned.await;
        }
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::AcqRel);
        Self(waiting)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builder for creating a connection pool.
pub struct PoolBuilder {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    diagnostics: Diagnostics,
    trust: Option<Arc<TrustModeStateMachine>>,
}

impl PoolBuilder {
    /// Create a builder with no diagnostics sinks and no trust observer
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            diagnostics: Diagnostics::none(),
            trust: None,
        }
    }

    /// Where pool events go
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// State machine notified of certificate-chain failures
    #[must_use]
    pub fn trust_observer(mut self, trust: Arc<TrustModeStateMachine>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Build the pool. No connection is opened until the first acquire.
    pub fn build(self) -> Pool {
        let config = self.config;
        let max = config.max_connections();

        for rejected in config.rejected_certificates() {
            self.diagnostics
                .error(&Error::Certificate(rejected.clone()));
        }

        self.diagnostics.emit(PoolEvent::PoolCreated {
            host: config.target().host.clone(),
            trust_mode: config.trust_mode(),
            max_connections: max,
            ca_certificates: config.certificates().len(),
        });

        tracing::info!(
            host = %config.target().host,
            trust_mode = %config.trust_mode(),
            max,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            slots: Arc::new(Semaphore::new(max)),
            connector: self.connector,
            diagnostics: self.diagnostics,
            trust: self.trust,
            idle: Mutex::new(VecDeque::with_capacity(max.min(IDLE_QUEUE_CAPACITY))),
            total: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            ended: AtomicBool::new(false),
            returned: Notify::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            config,
        });
        spawn_reaper(&inner);

        Pool { inner }
    }
}

/// Close idle connections on a timer, so a pool that goes quiet hands its
/// connections back. Stops once the pool ends or is dropped.
fn spawn_reaper(inner: &Arc<PoolInner>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime, idle connections are reaped on acquire only");
        return;
    };

    let period = inner.config.idle_timeout().max(MIN_REAP_PERIOD);
    let pool: Weak<PoolInner> = Arc::downgrade(inner);

    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = pool.upgrade() else {
                break;
            };
            if inner.ended.load(Ordering::Acquire) {
                break;
            }
            let reaped = inner.reap_idle();
            if reaped > 0 {
                tracing::debug!(reaped, "idle connections closed");
            }
        }
    });
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Open connections, idle or checked out.
    pub total: usize,
    /// Connections ready for reuse.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Callers waiting for a slot.
    pub waiting: usize,
    /// Maximum allowed connections.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, connect errors, pool closed).
    pub checkouts_failed: u64,
    /// Checkouts that ran out of time.
    pub timeouts: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool (or closed, if it
/// went bad or the pool has ended) before its slot is freed.
pub struct PooledConnection {
    conn: Option<Box<dyn DriverConnection>>,
    id: u64,
    pool: Arc<PoolInner>,
    // Declared last so the slot is freed after the connection is back
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Pool-local connection id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execute one statement on this connection
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.as_mut().ok_or(Error::PoolClosed)?;
        let result = conn.query(sql, params).await;
        if let Err(err) = &result {
            tracing::debug!(connection_id = self.id, error = %err, "query failed");
            self.pool.diagnostics.error(err);
        }
        result
    }

    /// Whether the underlying session has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.as_ref().map_or(true, |conn| conn.is_closed())
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.id, conn);
        }
    }
}

//! Process-wide pool registry
//!
//! Holds at most one visible [`Pool`] together with the trust state machine.
//! The pool is built lazily by the first caller; concurrent callers wait on
//! the registry's write guard and then share the result. A pool that no
//! longer matches the trust mode is swapped out and ended outside the guard.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Pool, PoolStatus};
use crate::config::{PoolConfig, PoolLimits, Settings};
use crate::connection::{Connector, PostgresConnector, QueryResult};
use crate::diagnostics::Diagnostics;
use crate::tls::{TrustMode, TrustModeStateMachine};
use crate::{Error, Result};

const HEALTH_CHECK_SQL: &str = "select 1 as ok";

/// Owner of the current pool and the trust state.
///
/// Share it as `Arc<PoolRegistry>`; [`PoolRegistry::global`] is a
/// convenience for code without a natural place to hold one.
pub struct PoolRegistry {
    settings: Settings,
    connector: Arc<dyn Connector>,
    diagnostics: Diagnostics,
    trust: Arc<TrustModeStateMachine>,
    limits: Option<PoolLimits>,
    current: RwLock<Option<Pool>>,
}

impl PoolRegistry {
    /// Registry over a settings snapshot, reporting through
    /// [`Diagnostics::tracing`]
    pub fn new(settings: Settings, connector: Arc<dyn Connector>) -> Self {
        let diagnostics = Diagnostics::tracing();
        Self {
            settings,
            connector,
            trust: Arc::new(TrustModeStateMachine::new(diagnostics.clone())),
            diagnostics,
            limits: None,
            current: RwLock::new(None),
        }
    }

    /// Registry over the process environment, connecting to Postgres
    pub fn from_env() -> Self {
        Self::new(Settings::from_env(), Arc::new(PostgresConnector::new()))
    }

    /// Lazily created registry over the process environment
    pub fn global() -> &'static PoolRegistry {
        static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::from_env)
    }

    /// Replace the diagnostics sinks. Call before first use.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.trust = Arc::new(TrustModeStateMachine::new(diagnostics.clone()));
        self.diagnostics = diagnostics;
        self
    }

    /// Use explicit pool limits instead of the ones in the settings
    #[must_use]
    pub fn with_limits(mut self, limits: PoolLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Current trust mode
    pub fn trust_mode(&self) -> TrustMode {
        self.trust.mode()
    }

    /// The trust state machine shared by every pool this registry builds
    pub fn trust(&self) -> &Arc<TrustModeStateMachine> {
        &self.trust
    }

    /// The visible pool, if one has been built
    pub async fn current(&self) -> Option<Pool> {
        self.current.read().await.clone()
    }

    /// Return the visible pool, building it first if there is none or the
    /// one there is closed or runs in a stale trust mode.
    ///
    /// The returned [`Pool`] is a snapshot. Only [`PoolRegistry::query`]
    /// rebuilds the pool after a trust downgrade; a caller holding a pool
    /// from here keeps its strict configuration until it calls
    /// `get_or_create` again. Once a rebuild has happened the old pool is
    /// ended, so the held handle fails with [`Error::PoolClosed`]. Callers
    /// that keep a pool should re-fetch on [`Error::TlsTrust`] or
    /// [`Error::PoolClosed`].
    ///
    /// # Errors
    ///
    /// Configuration errors from building the pool. Nothing is retried; the
    /// next caller attempts the build again.
    pub async fn get_or_create(&self) -> Result<Pool> {
        {
            let slot = self.current.read().await;
            if let Some(pool) = slot.as_ref() {
                if self.is_usable(pool, self.trust.mode()) {
                    return Ok(pool.clone());
                }
            }
        }

        let (pool, stale) = {
            let mut slot = self.current.write().await;
            let mode = self.trust.mode();
            if let Some(pool) = slot.as_ref() {
                if self.is_usable(pool, mode) {
                    return Ok(pool.clone());
                }
            }

            let pool = self.build(mode)?;
            (pool.clone(), slot.replace(pool))
        };

        if let Some(stale) = stale {
            stale.end().await;
        }
        Ok(pool)
    }

    /// Ask for `mode` and make the visible pool run in the resulting mode.
    ///
    /// The state machine decides the effective mode (a strict request after a
    /// downgrade stays relaxed). Does nothing when the visible pool already
    /// runs in it. The replaced pool is ended after the guard is released.
    pub async fn rebuild(&self, mode: TrustMode) -> Result<Pool> {
        let effective = self.trust.request(mode);

        let (pool, stale) = {
            let mut slot = self.current.write().await;
            if let Some(pool) = slot.as_ref() {
                if self.is_usable(pool, effective) {
                    return Ok(pool.clone());
                }
            }

            let pool = self.build(effective)?;
            (pool.clone(), slot.replace(pool))
        };

        tracing::info!(trust_mode = %effective, "pool rebuilt");

        if let Some(stale) = stale {
            stale.end().await;
        }
        Ok(pool)
    }

    /// End and forget the visible pool
    pub async fn teardown(&self) {
        let stale = self.current.write().await.take();
        if let Some(stale) = stale {
            stale.end().await;
        }
    }

    /// Run one statement on the current pool.
    ///
    /// A certificate-chain failure downgrades the trust mode and rebuilds
    /// the pool in relaxed mode, but the failing call still returns the
    /// error; the next call goes through the rebuilt pool.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let pool = self.get_or_create().await?;

        match pool.query(sql, params).await {
            Err(err) if err.is_trust_failure() && pool.trust_mode().validates_chain() => {
                self.trust.observe(&err);
                if let Err(rebuild_err) = self.rebuild(TrustMode::Relaxed).await {
                    tracing::warn!(error = %rebuild_err, "rebuilding pool in relaxed mode failed");
                    self.diagnostics.error(&rebuild_err);
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Run a trivial statement and describe the outcome
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = self.query(HEALTH_CHECK_SQL, &[]).await;
        let pool = self.current().await;

        let (ok, error) = match &outcome {
            Ok(result) => {
                let ok = result.first().and_then(|row| row.get("ok")) == Some(&Value::from(1));
                (ok, None)
            }
            Err(err) => (false, Some(ErrorReport::from(err))),
        };

        HealthReport {
            ok,
            trust_mode: self.trust.mode(),
            host: pool.as_ref().map(|p| p.config().target().host.clone()),
            ca_certificates: pool.as_ref().map_or(0, |p| p.config().certificates().len()),
            status: pool.as_ref().map(Pool::status),
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }

    fn is_usable(&self, pool: &Pool, mode: TrustMode) -> bool {
        !pool.is_closed() && pool.trust_mode() == mode
    }

    fn build(&self, mode: TrustMode) -> Result<Pool> {
        let mut builder = PoolConfig::builder(&self.settings).trust_mode(mode);
        if let Some(limits) = self.limits {
            builder = builder.limits(limits);
        }

        let config = builder.build().map_err(|err| {
            tracing::error!(error = %err, "cannot build pool configuration");
            self.diagnostics.error(&err);
            err
        })?;

        Ok(Pool::builder(config, Arc::clone(&self.connector))
            .diagnostics(self.diagnostics.clone())
            .trust_observer(Arc::clone(&self.trust))
            .build())
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .field("trust_mode", &self.trust.mode())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Outcome of [`PoolRegistry::health_check`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Whether the health query returned `ok = 1`
    pub ok: bool,
    /// Trust mode after the health query
    pub trust_mode: TrustMode,
    /// Target host of the visible pool
    pub host: Option<String>,
    /// CA certificates attached to the visible pool
    pub ca_certificates: usize,
    /// Pool counters after the health query
    pub status: Option<PoolStatus>,
    /// Probe duration
    pub duration_ms: u64,
    /// Failure details
    pub error: Option<ErrorReport>,
}

/// Serializable view of an [`Error`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Error classification
    pub kind: &'static str,
    /// Rendered error
    pub message: String,
    /// SQLSTATE, for server errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Server severity, for server errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Server detail, for server errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Server hint, for server errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        let mut report = Self {
            kind: err.kind().as_str(),
            message: err.to_string(),
            code: None,
            severity: None,
            detail: None,
            hint: None,
        };

        if let Error::Query {
            code,
            severity,
            detail,
            hint,
            ..
        } = err
        {
            report.code = Some(code.clone());
            report.severity = Some(severity.clone());
            report.detail = detail.clone();
            report.hint = hint.clone();
        }

        report
    }
}

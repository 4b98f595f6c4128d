//! Pool configuration
//!
//! [`PoolConfigBuilder`] resolves [`Settings`] and a [`TrustMode`] into an
//! immutable [`PoolConfig`]. Building is pure: nothing here touches the
//! network or the filesystem, so a missing setting is reported before any
//! connection attempt.

use super::connection_string::ConnectionInfo;
use super::env::{keys, Settings};
use crate::tls::{parse_server_name, CertificateBundle, SslMode, TrustMode};
use crate::{Error, Result};
use rustls_pki_types::CertificateDer;
use std::time::Duration;

/// Port used when discrete settings omit `POSTGRES_PORT` (transaction pooler)
pub const DEFAULT_DISCRETE_PORT: u16 = 6543;
/// Database used when discrete settings omit `POSTGRES_DATABASE`
pub const DEFAULT_DISCRETE_DATABASE: &str = "postgres";
/// Upper bound accepted for `max_connections`
pub const MAX_POOL_CONNECTIONS: usize = 10_000;

/// Where the connection target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// A connection URL
    Url,
    /// Individual host/port/user/password/database settings
    Discrete,
}

/// Resolved server endpoint and identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Role name
    pub user: String,
    /// Database name
    pub database: String,
}

/// Pool sizing and timing.
///
/// Defaults suit short-lived serverless instances: many instances may run
/// at once, so each keeps a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Maximum connections checked out or idle at once
    pub max_connections: usize,
    /// Idle connections older than this are discarded
    pub idle_timeout: Duration,
    /// Upper bound for one `acquire` (waiting plus connecting)
    pub connection_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: 1,
            idle_timeout: Duration::from_millis(10_000),
            connection_timeout: Duration::from_millis(5_000),
        }
    }
}

impl PoolLimits {
    /// Defaults overridden by any pool keys present in `settings`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut limits = Self::default();

        if let Some(max) = settings.get(keys::POSTGRES_POOL_MAX) {
            limits.max_connections = max.parse().map_err(|_| {
                Error::Config(format!("{} must be a positive integer", keys::POSTGRES_POOL_MAX))
            })?;
        }
        if let Some(ms) = parse_millis(settings, keys::POSTGRES_POOL_IDLE_TIMEOUT_MS)? {
            limits.idle_timeout = ms;
        }
        if let Some(ms) = parse_millis(settings, keys::POSTGRES_POOL_CONNECT_TIMEOUT_MS)? {
            limits.connection_timeout = ms;
        }

        limits.validate()?;
        Ok(limits)
    }

    /// Reject unusable limits
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.max_connections > MAX_POOL_CONNECTIONS {
            return Err(Error::Config(format!(
                "max_connections must be at most {}, got {}",
                MAX_POOL_CONNECTIONS, self.max_connections
            )));
        }
        if self.connection_timeout.is_zero() {
            return Err(Error::Config("connection_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_millis(settings: &Settings, key: &str) -> Result<Option<Duration>> {
    settings
        .get(key)
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| Error::Config(format!("{} must be a number of milliseconds", key)))
        })
        .transpose()
}

/// Immutable snapshot a pool is built from
#[derive(Clone)]
pub struct PoolConfig {
    target: ConnectionTarget,
    source: TargetSource,
    password: Option<String>,
    ssl_mode: SslMode,
    server_name: String,
    certificates: CertificateBundle,
    trust_anchors: Vec<CertificateDer<'static>>,
    rejected_certificates: Vec<String>,
    trust_mode: TrustMode,
    limits: PoolLimits,
}

impl PoolConfig {
    /// Start building from `settings`
    pub fn builder(settings: &Settings) -> PoolConfigBuilder<'_> {
        PoolConfigBuilder::new(settings)
    }

    /// Resolved target
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// URL or discrete settings
    pub fn source(&self) -> TargetSource {
        self.source
    }

    /// Password, if any
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Whether TLS is negotiated
    pub fn ssl_mode(&self) -> SslMode {
        self.ssl_mode
    }

    /// SNI name presented during the handshake
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Normalized CA bundle
    pub fn certificates(&self) -> &CertificateBundle {
        &self.certificates
    }

    /// Decoded anchors; empty unless strict mode with TLS
    pub fn trust_anchors(&self) -> &[CertificateDer<'static>] {
        &self.trust_anchors
    }

    /// Bundle entries dropped while decoding
    pub fn rejected_certificates(&self) -> &[String] {
        &self.rejected_certificates
    }

    /// Trust mode the pool runs in
    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    /// Sizing and timing
    pub fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// Maximum connections
    pub fn max_connections(&self) -> usize {
        self.limits.max_connections
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        self.limits.idle_timeout
    }

    /// Acquire timeout
    pub fn connection_timeout(&self) -> Duration {
        self.limits.connection_timeout
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("target", &self.target)
            .field("source", &self.source)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl_mode", &self.ssl_mode)
            .field("server_name", &self.server_name)
            .field("ca_certificates", &self.certificates.len())
            .field("trust_anchors", &self.trust_anchors.len())
            .field("trust_mode", &self.trust_mode)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Builder for [`PoolConfig`]
#[derive(Debug)]
pub struct PoolConfigBuilder<'a> {
    settings: &'a Settings,
    trust_mode: TrustMode,
    limits: Option<PoolLimits>,
}

impl<'a> PoolConfigBuilder<'a> {
    /// Builder reading `settings`, strict trust, limits from settings
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            trust_mode: TrustMode::Strict,
            limits: None,
        }
    }

    /// Set the trust mode
    pub fn trust_mode(mut self, mode: TrustMode) -> Self {
        self.trust_mode = mode;
        self
    }

    /// Use explicit limits instead of the settings
    pub fn limits(mut self, limits: PoolLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Resolve everything into a [`PoolConfig`].
    ///
    /// # Errors
    ///
    /// - [`Error::MissingConfig`] when there is no URL and any of host, user
    ///   or password is missing
    /// - [`Error::Config`] for unparsable values
    pub fn build(self) -> Result<PoolConfig> {
        let settings = self.settings;

        let (target, password, url_sslmode, source) = match settings.first_of(keys::URL_KEYS) {
            Some(url) => {
                let info = ConnectionInfo::parse(url)?;
                let target = info.target();
                (target, info.password, info.sslmode, TargetSource::Url)
            }
            None => {
                let (target, password) = self.discrete_target()?;
                (target, Some(password), None, TargetSource::Discrete)
            }
        };

        let ssl_mode = match url_sslmode {
            Some(mode) => mode,
            None => settings
                .get(keys::POSTGRES_SSLMODE)
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
        };

        let server_name = if ssl_mode.uses_tls() {
            parse_server_name(&target.host)?
        } else {
            target.host.clone()
        };

        let certificates = CertificateBundle::from_pem_text(settings.first_raw_of(keys::CA_KEYS));

        let (trust_anchors, rejected_certificates) =
            if ssl_mode.uses_tls() && self.trust_mode.validates_chain() {
                let decoded = certificates.decode();
                let rejected = decoded.rejected.iter().map(ToString::to_string).collect();
                (decoded.anchors, rejected)
            } else {
                (Vec::new(), Vec::new())
            };

        let limits = match self.limits {
            Some(limits) => {
                limits.validate()?;
                limits
            }
            None => PoolLimits::from_settings(settings)?,
        };

        Ok(PoolConfig {
            target,
            source,
            password,
            ssl_mode,
            server_name,
            certificates,
            trust_anchors,
            rejected_certificates,
            trust_mode: self.trust_mode,
            limits,
        })
    }

    fn discrete_target(&self) -> Result<(ConnectionTarget, String)> {
        let settings = self.settings;
        let host = settings.get(keys::POSTGRES_HOST);
        let user = settings.get(keys::POSTGRES_USER);
        let password = settings.get(keys::POSTGRES_PASSWORD);

        let (host, user, password) = match (host, user, password) {
            (Some(host), Some(user), Some(password)) => (host, user, password),
            _ => {
                let missing = [
                    (keys::POSTGRES_HOST, host),
                    (keys::POSTGRES_USER, user),
                    (keys::POSTGRES_PASSWORD, password),
                ]
                .iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key.to_string())
                .collect();
                return Err(Error::MissingConfig { keys: missing });
            }
        };

        let port = settings
            .get(keys::POSTGRES_PORT)
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|_| Error::Config(format!("invalid {} '{}'", keys::POSTGRES_PORT, p)))
            })
            .transpose()?
            .unwrap_or(DEFAULT_DISCRETE_PORT);

        let database = settings
            .get(keys::POSTGRES_DATABASE)
            .unwrap_or(DEFAULT_DISCRETE_DATABASE);

        Ok((
            ConnectionTarget {
                host: host.to_string(),
                port,
                user: user.to_string(),
                database: database.to_string(),
            },
            password.to_string(),
        ))
    }
}

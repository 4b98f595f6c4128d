//! Environment-sourced settings

use std::collections::HashMap;
use std::fmt;

/// Recognized environment keys
pub mod keys {
    /// Full connection URL (preferred)
    pub const POSTGRES_URL: &str = "POSTGRES_URL";
    /// Alternative name for the connection URL
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// Discrete host
    pub const POSTGRES_HOST: &str = "POSTGRES_HOST";
    /// Discrete port
    pub const POSTGRES_PORT: &str = "POSTGRES_PORT";
    /// Discrete user
    pub const POSTGRES_USER: &str = "POSTGRES_USER";
    /// Discrete password
    pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
    /// Discrete database name
    pub const POSTGRES_DATABASE: &str = "POSTGRES_DATABASE";
    /// sslmode when not given in the URL
    pub const POSTGRES_SSLMODE: &str = "POSTGRES_SSLMODE";
    /// CA bundle text
    pub const POSTGRES_CA_CERT: &str = "POSTGRES_CA_CERT";
    /// Legacy name for the CA bundle text
    pub const SUPABASE_SSL_CERT: &str = "SUPABASE_SSL_CERT";
    /// Pool size override
    pub const POSTGRES_POOL_MAX: &str = "POSTGRES_POOL_MAX";
    /// Idle timeout override, milliseconds
    pub const POSTGRES_POOL_IDLE_TIMEOUT_MS: &str = "POSTGRES_POOL_IDLE_TIMEOUT_MS";
    /// Connection timeout override, milliseconds
    pub const POSTGRES_POOL_CONNECT_TIMEOUT_MS: &str = "POSTGRES_POOL_CONNECT_TIMEOUT_MS";

    /// URL keys in precedence order
    pub const URL_KEYS: &[&str] = &[POSTGRES_URL, DATABASE_URL];
    /// CA bundle keys in precedence order
    pub const CA_KEYS: &[&str] = &[POSTGRES_CA_CERT, SUPABASE_SSL_CERT];

    /// Every key read by [`super::Settings::from_env`]
    pub const ALL: &[&str] = &[
        POSTGRES_URL,
        DATABASE_URL,
        POSTGRES_HOST,
        POSTGRES_PORT,
        POSTGRES_USER,
        POSTGRES_PASSWORD,
        POSTGRES_DATABASE,
        POSTGRES_SSLMODE,
        POSTGRES_CA_CERT,
        SUPABASE_SSL_CERT,
        POSTGRES_POOL_MAX,
        POSTGRES_POOL_IDLE_TIMEOUT_MS,
        POSTGRES_POOL_CONNECT_TIMEOUT_MS,
    ];
}

/// Snapshot of the key/value settings the pool is configured from.
///
/// Taken once (normally at registry creation); later changes to the process
/// environment are not observed.
#[derive(Clone, Default)]
pub struct Settings {
    vars: HashMap<String, String>,
}

impl Settings {
    /// Read every recognized key from the process environment
    pub fn from_env() -> Self {
        Self::from_pairs(
            keys::ALL
                .iter()
                .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value))),
        )
    }

    /// Build from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Trimmed value; empty values count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Untrimmed value; empty values count as absent
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First present trimmed value among `keys`
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// First present untrimmed value among `keys`
    pub fn first_raw_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.raw(key))
    }

    /// Whether `key` is present and non-empty
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut present: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        present.sort_unstable();
        f.debug_struct("Settings")
            .field("keys", &present)
            .finish()
    }
}

//! rustls client configuration for pooled connections.
//!
//! [`client_config`] turns a trust mode and the decoded CA bundle into a
//! rustls `ClientConfig`. Handshake failures coming back from the driver are
//! classified by [`classify_tls_failure`] so that chain-trust failures can be
//! told apart from every other TLS problem.

use super::TrustMode;
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::error::Error as StdError;
use std::sync::{Arc, OnceLock};

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
///
/// Only decides whether TLS is negotiated. How the server certificate is
/// checked is governed by [`TrustMode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// TLS is attempted and required; there is no plaintext fallback
    Allow,
    /// TLS is attempted and required; there is no plaintext fallback
    Prefer,
    /// TLS required
    #[default]
    Require,
    /// TLS required; accepted for compatibility, behaves like `Require`
    VerifyCa,
    /// TLS required; accepted for compatibility, behaves like `Require`
    VerifyFull,
    /// TLS required; certificates are still checked per [`TrustMode`]
    NoVerify,
}

impl SslMode {
    /// Whether TLS is negotiated at all
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Allow => write!(f, "allow"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
            Self::NoVerify => write!(f, "no-verify"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            "no-verify" => Ok(Self::NoVerify),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, allow, prefer, require, verify-ca, verify-full, or no-verify",
                s
            ))),
        }
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is empty, too long or contains
/// characters that cannot appear in a DNS name or IP address.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    // Remove trailing dot if present
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.' || c == ':')
    {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the rustls client configuration for `trust_mode`.
///
/// Strict mode trusts `anchors`; when no anchor is usable it falls back to
/// the platform roots. Relaxed mode accepts any server certificate but
/// still checks handshake signatures.
pub fn client_config(trust_mode: TrustMode, anchors: &[CertificateDer<'static>]) -> Result<ClientConfig> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("unsupported TLS configuration: {}", e)))?;

    let config = match trust_mode {
        TrustMode::Strict => builder
            .with_root_certificates(root_store(anchors))
            .with_no_client_auth(),
        TrustMode::Relaxed => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoChainVerification::new(provider)))
            .with_no_client_auth(),
    };

    Ok(config)
}

fn root_store(anchors: &[CertificateDer<'static>]) -> RootCertStore {
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(anchors.iter().cloned());

    if ignored > 0 {
        tracing::warn!(added, ignored, "some CA bundle certificates were not usable");
    }

    if store.is_empty() {
        tracing::debug!("no custom CA anchors, using platform roots");
        store.add_parsable_certificates(system_roots().iter().cloned());
        if store.is_empty() {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    store
}

/// Platform root certificates, loaded once per process
fn system_roots() -> &'static [CertificateDer<'static>] {
    static ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();
    ROOTS.get_or_init(|| {
        let result = rustls_native_certs::load_native_certs();
        if !result.errors.is_empty() {
            tracing::debug!(
                errors = result.errors.len(),
                "errors while loading platform root certificates"
            );
        }
        result.certs
    })
}

/// Verifier used in relaxed mode: accepts any chain, verifies signatures.
#[derive(Debug)]
struct NoChainVerification {
    provider: Arc<CryptoProvider>,
}

impl NoChainVerification {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoChainVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Map a rustls error to the crate taxonomy
pub fn from_rustls(err: &rustls::Error) -> Error {
    match err {
        rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer | CertificateError::BadSignature,
        ) => Error::TlsTrust(err.to_string()),
        _ => Error::Tls(err.to_string()),
    }
}

/// Walk an error chain looking for a TLS failure.
///
/// Returns `None` when no link of the chain is TLS-related.
pub fn classify_tls_failure(err: &(dyn StdError + 'static)) -> Option<Error> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return Some(from_rustls(tls));
        }
        // tokio-rustls wraps handshake errors in io::Error, whose source()
        // skips the wrapped value.
        if let Some(inner) = e
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
                return Some(from_rustls(tls));
            }
        }
        current = e.source();
    }

    None
}

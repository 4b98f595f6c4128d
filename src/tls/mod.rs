//! TLS trust handling
//!
//! This module handles:
//! * CA bundle normalization and decoding
//! * The strict/relaxed trust mode state machine
//! * rustls client configuration and handshake error classification

mod certs;
mod client;
mod trust;

pub use certs::{normalize, CertificateBundle, DecodedBundle};
pub use client::{classify_tls_failure, client_config, from_rustls, parse_server_name, SslMode};
pub use trust::{TrustMode, TrustModeStateMachine};

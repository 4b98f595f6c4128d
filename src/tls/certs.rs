//! CA bundle normalization
//!
//! CA material usually arrives through an environment variable, which means
//! it may carry Windows line endings, several certificates pasted back to
//! back, stray text between blocks, or nothing at all. [`normalize`] turns
//! that into a clean ordered list of PEM certificates; [`CertificateBundle`]
//! wraps the result and decodes it into DER trust anchors.

use crate::Error;
use rustls_pemfile::Item;
use rustls_pki_types::CertificateDer;

const BEGIN_MARKER: &str = "-----BEGIN CERTIFICATE-----";
const END_MARKER: &str = "-----END CERTIFICATE-----";

/// Extract every PEM certificate block from `raw`, in appearance order.
///
/// CRLF is converted to LF, each block is trimmed and terminated by exactly
/// one newline. Missing input or input without a complete block yields an
/// empty vector.
pub fn normalize(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let text = raw.replace("\r\n", "\n");
    let mut certs = Vec::new();
    let mut rest = text.as_str();

    while let Some(start) = rest.find(BEGIN_MARKER) {
        let after_begin = &rest[start + BEGIN_MARKER.len()..];
        let Some(end) = after_begin.find(END_MARKER) else {
            break;
        };
        let block_len = BEGIN_MARKER.len() + end + END_MARKER.len();
        let block = rest[start..start + block_len].trim();
        certs.push(format!("{}\n", block));
        rest = &rest[start + block_len..];
    }

    certs
}

/// Ordered, normalized CA certificates used as trust anchors in strict mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateBundle {
    certs: Vec<String>,
}

/// Result of decoding a bundle into DER
#[derive(Debug, Default)]
pub struct DecodedBundle {
    /// Certificates that decoded cleanly, in bundle order
    pub anchors: Vec<CertificateDer<'static>>,
    /// One error per entry that was dropped
    pub rejected: Vec<Error>,
}

impl CertificateBundle {
    /// Normalize raw bundle text
    pub fn from_pem_text(raw: Option<&str>) -> Self {
        Self {
            certs: normalize(raw),
        }
    }

    /// Normalized PEM certificates
    pub fn certificates(&self) -> &[String] {
        &self.certs
    }

    /// Number of certificates
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether no certificate was found
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Concatenated PEM text
    pub fn to_pem_text(&self) -> String {
        self.certs.concat()
    }

    /// Total PEM bytes, for diagnostics
    pub fn total_len(&self) -> usize {
        self.certs.iter().map(String::len).sum()
    }

    /// Decode every entry into DER.
    ///
    /// Entries whose base64 body is corrupt are skipped and reported in
    /// [`DecodedBundle::rejected`]; decoding never fails as a whole.
    pub fn decode(&self) -> DecodedBundle {
        let mut decoded = DecodedBundle::default();

        for (index, pem) in self.certs.iter().enumerate() {
            let mut reader = std::io::Cursor::new(pem.as_bytes());
            match rustls_pemfile::read_one(&mut reader) {
                Ok(Some(Item::X509Certificate(cert))) => decoded.anchors.push(cert),
                Ok(_) => decoded.rejected.push(Error::Certificate(format!(
                    "certificate #{} has no decodable body",
                    index + 1
                ))),
                Err(e) => decoded.rejected.push(Error::Certificate(format!(
                    "certificate #{}: {}",
                    index + 1,
                    e
                ))),
            }
        }

        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal syntactically valid PEM bodies; content is arbitrary base64.
    const CERT_A: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIU\n-----END CERTIFICATE-----";
    const CERT_B: &str = "-----BEGIN CERTIFICATE-----\nMIIBuTCCAV+gAwIBAgIU\n-----END CERTIFICATE-----";

    #[test]
    fn test_normalize_absent_and_empty() {
        assert!(normalize(None).is_empty());
        assert!(normalize(Some("")).is_empty());
        assert!(normalize(Some("not a certificate")).is_empty());
    }

    #[test]
    fn test_normalize_single_block() {
        let certs = normalize(Some(CERT_A));
        assert_eq!(certs, vec![format!("{}\n", CERT_A)]);
    }

    #[test]
    fn test_normalize_crlf() {
        let raw = CERT_A.replace('\n', "\r\n");
        let certs = normalize(Some(&raw));
        assert_eq!(certs.len(), 1);
        assert!(!certs[0].contains('\r'));
        assert_eq!(certs[0], format!("{}\n", CERT_A));
    }

    #[test]
    fn test_normalize_preserves_order_and_count() {
        let raw = format!("junk\n{}\n\n  {}  \ntrailing", CERT_B, CERT_A);
        let certs = normalize(Some(&raw));
        assert_eq!(certs.len(), 2);
        assert!(certs[0].contains("MIIBuTCC"));
        assert!(certs[1].contains("MIIBszCC"));
    }

    #[test]
    fn test_normalize_keeps_duplicates() {
        let raw = format!("{}{}", CERT_A, CERT_A);
        assert_eq!(normalize(Some(&raw)).len(), 2);
    }

    #[test]
    fn test_normalize_ignores_unterminated_block() {
        let raw = format!("{}\n-----BEGIN CERTIFICATE-----\nMIIB", CERT_A);
        assert_eq!(normalize(Some(&raw)).len(), 1);
    }

    #[test]
    fn test_normalize_is_non_greedy() {
        let raw = format!("{}\nmiddle\n{}", CERT_A, CERT_B);
        let certs = normalize(Some(&raw));
        assert_eq!(certs.len(), 2);
        assert!(!certs[0].contains("middle"));
    }

    #[test]
    fn test_normalize_idempotent() {
        let raw = format!("{}\r\n\r\n{}\r\n", CERT_A, CERT_B);
        let once = normalize(Some(&raw));
        let twice = normalize(Some(&once.concat()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bundle_accessors() {
        let bundle = CertificateBundle::from_pem_text(Some(&format!("{}{}", CERT_A, CERT_B)));
        assert_eq!(bundle.len(), 2);
        assert!(!bundle.is_empty());
        assert_eq!(bundle.total_len(), CERT_A.len() + CERT_B.len() + 2);
        assert_eq!(
            CertificateBundle::from_pem_text(Some(&bundle.to_pem_text())),
            bundle
        );
        assert!(CertificateBundle::from_pem_text(None).is_empty());
    }

    #[test]
    fn test_decode_valid_blocks() {
        let bundle = CertificateBundle::from_pem_text(Some(&format!("{}{}", CERT_A, CERT_B)));
        let decoded = bundle.decode();
        assert_eq!(decoded.anchors.len(), 2);
        assert!(decoded.rejected.is_empty());
    }

    #[test]
    fn test_decode_skips_malformed_block() {
        let broken = "-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----";
        let bundle = CertificateBundle::from_pem_text(Some(&format!("{}{}", broken, CERT_A)));
        let decoded = bundle.decode();
        assert_eq!(decoded.anchors.len(), 1);
        assert_eq!(decoded.rejected.len(), 1);
        assert_eq!(decoded.rejected[0].kind(), crate::ErrorKind::Certificate);
    }
}

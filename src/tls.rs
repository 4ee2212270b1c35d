//! TLS fingerprinting over pre-dissected handshake fields.
//!
//! The fingerprint is a JA3-style signature: the handshake version, cipher
//! suites, extension types, supported groups and EC point formats are joined
//! into one delimited string and hashed with MD5. It is a best-effort
//! signature over whatever fields the dissector exposed, not a byte-exact
//! ClientHello parse.
//!
//! Certificate heuristic: when the dissector yields a two-element
//! subject/issuer string pair and both values are identical, the traffic is
//! flagged as self-signed. The two-element ordering is an approximation that
//! varies by dissector version; this is not chain validation.

use std::collections::HashSet;
use std::path::Path;

use md5::{Digest, Md5};
use serde::Serialize;
use tracing::{debug, warn};

use crate::record::LayerView;

/// Handshake version assumed when the dissector omits the field (TLS 1.2).
const DEFAULT_VERSION: &str = "771";

/// Result of analyzing one TLS layer. Zero-value (all `None`, not
/// suspicious) when the layer carries nothing usable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsFingerprint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_issuer: Option<String>,
    pub suspicious: bool,
    pub risk_reasons: Vec<String>,
}

/// Analyzes TLS layers against a configurable denylist of known-bad
/// fingerprint hashes. All internal failures are absorbed: a misparse
/// returns the zero-value result and never aborts the scan.
#[derive(Debug, Default)]
pub struct TlsAnalyzer {
    denylist: HashSet<String>,
}

impl TlsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the denylist from a file: one lowercase hex hash per line,
    /// blank lines and `#` comments ignored. A missing or unreadable file
    /// leaves the denylist empty and logs a warning.
    pub fn with_denylist(path: &Path) -> Self {
        let mut analyzer = Self::new();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                analyzer.denylist = parse_denylist(&content);
                debug!(
                    "Loaded {} denylisted TLS fingerprints from {}",
                    analyzer.denylist.len(),
                    path.display()
                );
            }
            Err(e) => {
                warn!("Failed to read TLS denylist {}: {}", path.display(), e);
            }
        }
        analyzer
    }

    /// Derives the fingerprint and certificate risk signal from one TLS
    /// layer view.
    pub fn analyze(&self, tls: &LayerView) -> TlsFingerprint {
        let mut result = TlsFingerprint {
            sni: tls.field("tls.handshake.extensions_server_name"),
            ..Default::default()
        };

        // Absence of the cipher list suppresses the fingerprint entirely.
        if let Some(ciphers) = tls.field("tls.handshake.ciphersuites") {
            let version = tls
                .field("tls.handshake.version")
                .unwrap_or_else(|| DEFAULT_VERSION.to_string());
            let extensions = tls.field("tls.handshake.extension.type").unwrap_or_default();
            let curves = tls
                .field("tls.handshake.extensions_supported_groups")
                .unwrap_or_default();
            let points = tls
                .field("tls.handshake.extensions_ec_point_formats")
                .unwrap_or_default();

            let hash = fingerprint_hash(&version, &ciphers, &extensions, &curves, &points);
            if self.denylist.contains(&hash) {
                result.suspicious = true;
                result
                    .risk_reasons
                    .push("known malicious TLS signature".to_string());
            }
            result.hash = Some(hash);
        }

        // Dissectors expose certificate strings as a flat x509sat list; the
        // first value is taken as subject, the second as issuer.
        let cert_strings = tls.field_all("x509sat.uTF8String");
        if cert_strings.len() >= 2 {
            let subject = cert_strings[0].clone();
            let issuer = cert_strings[1].clone();
            if subject == issuer {
                result.suspicious = true;
                result
                    .risk_reasons
                    .push("self-signed certificate detected".to_string());
            }
            result.cert_subject = Some(subject);
            result.cert_issuer = Some(issuer);
        }

        result
    }
}

/// Computes the signature hash over the handshake parameter tuple.
pub fn fingerprint_hash(
    version: &str,
    ciphers: &str,
    extensions: &str,
    curves: &str,
    points: &str,
) -> String {
    let signature = format!("{version},{ciphers},{extensions},{curves},{points}");
    let mut hasher = Md5::new();
    hasher.update(signature.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_denylist(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: &serde_json::Value) -> LayerView<'_> {
        LayerView::new(value).unwrap()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint_hash("771", "4865-4866", "0-10-11", "29-23", "0");
        let b = fingerprint_hash("771", "4865-4866", "0-10-11", "29-23", "0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32, "MD5 digest is 32 hex chars");
    }

    #[test]
    fn test_fingerprint_changes_with_ciphers() {
        let a = fingerprint_hash("771", "4865-4866", "0-10", "29", "0");
        let b = fingerprint_hash("771", "4865-4867", "0-10", "29", "0");
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_ciphers_suppresses_fingerprint() {
        let value = json!({
            "tls.handshake.extensions_server_name": "example.com"
        });

        let fp = TlsAnalyzer::new().analyze(&layer(&value));
        assert!(fp.hash.is_none());
        assert_eq!(fp.sni.as_deref(), Some("example.com"));
        assert!(!fp.suspicious);
    }

    #[test]
    fn test_self_signed_detection() {
        let value = json!({
            "x509sat.uTF8String": ["Evil Corp CA", "Evil Corp CA"]
        });

        let fp = TlsAnalyzer::new().analyze(&layer(&value));
        assert!(fp.suspicious);
        assert!(fp
            .risk_reasons
            .iter()
            .any(|r| r.contains("self-signed")));
    }

    #[test]
    fn test_distinct_subject_issuer_not_suspicious() {
        let value = json!({
            "x509sat.uTF8String": ["example.com", "Trusted CA"]
        });

        let fp = TlsAnalyzer::new().analyze(&layer(&value));
        assert!(!fp.suspicious);
        assert_eq!(fp.cert_subject.as_deref(), Some("example.com"));
        assert_eq!(fp.cert_issuer.as_deref(), Some("Trusted CA"));
    }

    #[test]
    fn test_denylist_match() {
        let hash = fingerprint_hash("771", "4865", "0", "29", "0");
        let mut analyzer = TlsAnalyzer::new();
        analyzer.denylist = parse_denylist(&format!("# known C2\n{hash}\n"));

        let value = json!({
            "tls.handshake.version": "771",
            "tls.handshake.ciphersuites": "4865",
            "tls.handshake.extension.type": "0",
            "tls.handshake.extensions_supported_groups": "29",
            "tls.handshake.extensions_ec_point_formats": "0"
        });

        let fp = analyzer.analyze(&layer(&value));
        assert!(fp.suspicious);
        assert!(fp
            .risk_reasons
            .iter()
            .any(|r| r.contains("known malicious")));
    }

    #[test]
    fn test_empty_layer_zero_value() {
        let value = json!({});
        let fp = TlsAnalyzer::new().analyze(&layer(&value));
        assert!(fp.hash.is_none());
        assert!(fp.sni.is_none());
        assert!(!fp.suspicious);
        assert!(fp.risk_reasons.is_empty());
    }

    #[test]
    fn test_parse_denylist_skips_comments() {
        let set = parse_denylist("# comment\n\nABCDEF\n  deadbeef  \n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("abcdef"));
        assert!(set.contains("deadbeef"));
    }
}

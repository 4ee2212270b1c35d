//! Security alerts and deduplication.
//!
//! Every alert carries an explicit category tag attached by the stage that
//! raised it. Scoring and SIEM severity mapping switch on the tag, never on
//! the alert text.

use std::collections::HashSet;

use serde::{Serialize, Serializer};

/// Category of finding an alert represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    /// Cleartext credentials observed on the wire. Triggers the score cap.
    Credential,
    /// Port-scan behavior between one source and one destination.
    Scan,
    /// Suspicious TLS fingerprint or certificate.
    TlsSuspicious,
    /// Statistical anomaly from the fusion stage.
    Anomaly,
    /// Threat-intelligence indicator match.
    ThreatIntel,
    /// Anything else.
    Generic,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credential => write!(f, "credential"),
            Self::Scan => write!(f, "scan"),
            Self::TlsSuspicious => write!(f, "tls_suspicious"),
            Self::Anomaly => write!(f, "anomaly"),
            Self::ThreatIntel => write!(f, "threat_intel"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A human-readable security alert.
///
/// Alerts compare and deduplicate by exact text. Text embeds variable detail
/// (addresses, counts), so near-duplicates with differing detail survive
/// dedup deliberately: each carries distinct forensic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alert {
    pub text: String,
    pub category: AlertCategory,
}

impl Alert {
    pub fn new(category: AlertCategory, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category,
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

// The report contract exposes alerts as bare strings.
impl Serialize for Alert {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

/// Collapses repeated alerts into a unique sequence, keyed by exact text.
/// First occurrence wins; output order follows first appearance.
pub fn dedupe(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut seen: HashSet<String> = HashSet::with_capacity(alerts.len());
    alerts
        .into_iter()
        .filter(|a| seen.insert(a.text.clone()))
        .collect()
}

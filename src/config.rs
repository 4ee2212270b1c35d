//! Configuration Module
//!
//! Provides TOML-based configuration for NetScope.
//! Configuration is optional - CLI arguments can override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::siem::SiemFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub tls: TlsConfig,
    pub fusion: FusionConfig,
    pub intel: IntelConfig,
    pub vendor: VendorConfig,
    pub siem: SiemConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if it exists, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_records == 0 {
            anyhow::bail!("max_records must be greater than 0");
        }
        if self.analysis.scan_port_threshold == 0 {
            anyhow::bail!("scan_port_threshold must be greater than 0");
        }
        if self.analysis.credential_score_cap > 100 {
            anyhow::bail!("credential_score_cap must be at most 100");
        }
        if self.fusion.timeout_secs == 0 {
            anyhow::bail!("fusion timeout_secs must be greater than 0");
        }
        if self.fusion.intel_enabled && self.intel.url.is_none() {
            anyhow::bail!("intel fusion is enabled but no intel.url is configured");
        }
        if self.capture.duration_secs == 0 {
            anyhow::bail!("capture duration_secs must be greater than 0");
        }
        Ok(())
    }
}

/// Scoring and detection tunables. All score deltas are expressed as
/// positive penalties subtracted from the starting score of 100.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Distinct destination ports one (source, destination) pair may touch
    /// before being flagged as a scan.
    pub scan_port_threshold: usize,
    /// Penalty per offending scan pair.
    pub scan_penalty: f64,
    /// Penalty per cleartext HTTP record.
    pub http_penalty: f64,
    /// Penalty per cleartext-credential alert.
    pub credential_penalty: f64,
    /// Penalty per suspicious TLS alert.
    pub tls_penalty: f64,
    /// Penalty per fused anomaly alert.
    pub anomaly_penalty: f64,
    /// Flat penalty when any threat-intel indicator matches.
    pub intel_penalty: f64,
    /// Maximum score achievable when a credential alert is present.
    pub credential_score_cap: u32,
    /// Maximum records retained in the report (most-recent-first).
    pub max_records: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scan_port_threshold: 15,
            scan_penalty: 25.0,
            http_penalty: 0.5,
            credential_penalty: 5.0,
            tls_penalty: 10.0,
            anomaly_penalty: 5.0,
            intel_penalty: 20.0,
            credential_score_cap: 45,
            max_records: 10_000,
        }
    }
}

/// TLS fingerprinting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS fingerprinting and certificate heuristics.
    pub enabled: bool,
    /// Path to the known-bad fingerprint denylist (one hash per line).
    pub denylist_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            denylist_path: None,
        }
    }
}

/// Optional fusion stage toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Enable the statistical anomaly fusion stage.
    pub anomaly_enabled: bool,
    /// Enable the threat-intel fusion stage.
    pub intel_enabled: bool,
    /// Timeout applied to each fusion call, in seconds.
    pub timeout_secs: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            anomaly_enabled: true,
            intel_enabled: false,
            timeout_secs: 5,
        }
    }
}

/// Threat-intelligence backend endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IntelConfig {
    /// Base URL of the indicator-search endpoint.
    pub url: Option<String>,
    /// API key sent as Authorization header.
    pub api_key: Option<String>,
    /// Verify the backend's TLS certificate.
    pub verify_certs: bool,
}

/// MAC vendor lookup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Enable vendor enrichment of detected devices.
    pub enabled: bool,
    /// Path to an OUI prefix table ("AA:BB:CC<TAB>Vendor Name" per line).
    pub oui_path: Option<String>,
    /// Bounded lookup cache size.
    pub cache_size: usize,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            oui_path: None,
            cache_size: 4_096,
        }
    }
}

/// SIEM delivery configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SiemConfig {
    /// Webhook/collector endpoint (None disables push).
    pub url: Option<String>,
    /// Bearer token for the endpoint.
    pub token: Option<String>,
    /// Payload format.
    pub format: SiemFormat,
}

/// Capture collaborator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Path to the tshark binary.
    pub tshark_path: String,
    /// Path to the dumpcap binary used in high-performance mode.
    pub dumpcap_path: String,
    /// Interface to capture on (None = must be given on the CLI).
    pub interface: Option<String>,
    /// Capture duration in seconds.
    pub duration_secs: u64,
    /// BPF capture filter.
    pub bpf_filter: Option<String>,
    /// Prefer the native dumpcap engine (Linux) or raised buffers.
    pub high_performance: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tshark_path: "tshark".to_string(),
            dumpcap_path: "dumpcap".to_string(),
            interface: None,
            duration_secs: 30,
            bpf_filter: None,
            high_performance: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.analysis.scan_port_threshold, 15);
        assert_eq!(config.analysis.max_records, 10_000);
        assert_eq!(config.analysis.credential_score_cap, 45);
        assert!(config.fusion.anomaly_enabled);
        assert!(!config.fusion.intel_enabled);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.analysis.max_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_intel_requires_url() {
        let mut config = Config::default();
        config.fusion.intel_enabled = true;
        assert!(config.validate().is_err());

        config.intel.url = Some("https://misp.internal".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[analysis]"));
        assert!(config_str.contains("[tls]"));
        assert!(config_str.contains("[fusion]"));
        assert!(config_str.contains("[siem]"));
        assert!(config_str.contains("[capture]"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[analysis]
scan_port_threshold = 20
scan_penalty = 30.0

[fusion]
anomaly_enabled = false
intel_enabled = false
timeout_secs = 3

[capture]
interface = "eth0"
duration_secs = 60

[siem]
format = "cef"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis.scan_port_threshold, 20);
        assert_eq!(config.analysis.scan_penalty, 30.0);
        assert!(!config.fusion.anomaly_enabled);
        assert_eq!(config.capture.interface, Some("eth0".to_string()));
        assert_eq!(config.siem.format, SiemFormat::Cef);
        // Untouched sections keep their defaults.
        assert_eq!(config.analysis.http_penalty, 0.5);
    }
}

//! Trust-score aggregation.
//!
//! The score is an aggregate trust signal, not a simple sum: penalties apply
//! in a fixed order, the result is clamped to [0, 100], and a credential
//! exposure caps the final score no matter how clean the rest of the traffic
//! looks. Every delta is a configuration constant.

use crate::alert::{Alert, AlertCategory};
use crate::config::AnalysisConfig;

/// Computes the final clamped score from the classified HTTP record count
/// and the full (pre-dedup) alert list. Penalty order:
///
/// 1. start at 100
/// 2. per-HTTP-record penalty (unencrypted traffic)
/// 3. per-credential-alert penalty
/// 4. per-suspicious-TLS-alert penalty
/// 5. per-scan-pair penalty
/// 6. per-anomaly-alert penalty (fusion stage, when enabled)
/// 7. flat threat-intel penalty when any indicator matched
/// 8. clamp to [0, 100]
/// 9. kill switch: any credential alert caps the score
pub fn compute_score(config: &AnalysisConfig, http_records: usize, alerts: &[Alert]) -> u32 {
    let mut score = 100.0;

    score -= config.http_penalty * http_records as f64;

    let mut has_credential = false;
    let mut has_intel = false;
    for alert in alerts {
        match alert.category {
            AlertCategory::Credential => {
                has_credential = true;
                score -= config.credential_penalty;
            }
            AlertCategory::TlsSuspicious => score -= config.tls_penalty,
            AlertCategory::Scan => score -= config.scan_penalty,
            AlertCategory::Anomaly => score -= config.anomaly_penalty,
            AlertCategory::ThreatIntel => has_intel = true,
            AlertCategory::Generic => {}
        }
    }

    if has_intel {
        score -= config.intel_penalty;
    }

    let mut clamped = score.clamp(0.0, 100.0) as u32;

    if has_credential {
        clamped = clamped.min(config.credential_score_cap);
    }

    clamped
}

//! SIEM export: renders a finished report as a JSON audit event or a CEF
//! record stream and pushes it to a collector endpoint. Delivery is
//! best-effort; a failed push is logged and never fails the analysis.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::alert::AlertCategory;
use crate::config::SiemConfig;
use crate::pipeline::TrafficReport;

const CEF_VENDOR: &str = "NETSCOPE";
const CEF_PRODUCT: &str = "AuditEngine";
const CEF_VERSION: &str = "1.0";

/// Wire format for SIEM delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiemFormat {
    #[default]
    Json,
    Cef,
}

/// Builds the JSON audit event for a finished report.
pub fn json_event(report: &TrafficReport) -> serde_json::Value {
    let severity = if report.score < 50 { "high" } else { "low" };
    json!({
        "@timestamp": Utc::now().to_rfc3339(),
        "event_type": "netscope_audit",
        "severity": severity,
        "score": report.score,
        "alerts": report.alerts,
        "stats": {
            "packets_count": report.total_packets,
            "protocols": report.protocol_counts,
        },
        "meta": {
            "interface": report.interface,
            "duration": report.duration_secs,
        },
    })
}

/// Renders the report as a CEF record stream: one summary line followed by
/// one line per alert.
pub fn cef_events(report: &TrafficReport) -> String {
    let mut lines = Vec::with_capacity(report.alerts.len() + 1);

    let summary_severity = if report.score > 80 {
        1
    } else if report.score > 50 {
        5
    } else {
        10
    };
    lines.push(format!(
        "CEF:0|{CEF_VENDOR}|{CEF_PRODUCT}|{CEF_VERSION}|100|Traffic audit completed|{summary_severity}|msg=Audit completed score={} packets={}",
        report.score, report.total_packets
    ));

    for alert in &report.alerts {
        let severity = match alert.category {
            AlertCategory::Credential => 10,
            AlertCategory::Scan => 7,
            _ => 5,
        };
        lines.push(format!(
            "CEF:0|{CEF_VENDOR}|{CEF_PRODUCT}|{CEF_VERSION}|200|Security Alert|{severity}|msg={}",
            cef_escape(&alert.text)
        ));
    }

    lines.join("\n")
}

/// CEF header/extension fields may not carry the delimiter characters.
fn cef_escape(text: &str) -> String {
    text.replace('|', "/").replace('=', ":")
}

/// Pushes the report to the configured collector. No endpoint configured
/// means no delivery; failures are logged and swallowed.
pub async fn push(config: &SiemConfig, report: &TrafficReport) {
    let Some(ref url) = config.url else {
        return;
    };

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("SIEM client setup failed: {}", e);
            return;
        }
    };

    let mut request = match config.format {
        SiemFormat::Json => client.post(url).json(&json_event(report)),
        SiemFormat::Cef => client
            .post(url)
            .header("Content-Type", "text/plain")
            .body(cef_events(report)),
    };
    if let Some(ref token) = config.token {
        request = request
            .header("Authorization", format!("Bearer {token}"))
            .header("X-API-Key", token.clone());
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            info!("Report delivered to SIEM ({})", response.status());
        }
        Ok(response) => {
            warn!("SIEM endpoint rejected report: {}", response.status());
        }
        Err(e) => {
            warn!("SIEM delivery failed: {}", e);
        }
    }
}

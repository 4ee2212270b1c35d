//! The traffic-analysis pipeline: consumes a finite batch of decoded packet
//! trees and produces the scored [`TrafficReport`].
//!
//! Stage order: normalize each record (service resolution, TLS analysis and
//! scan tracking happen per record), finalize scan alerts, run the optional
//! fusion stages against materialized snapshots, aggregate the score,
//! deduplicate alerts, assemble the report. All state is owned by one run;
//! nothing survives the invocation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::alert::{self, Alert, AlertCategory};
use crate::config::Config;
use crate::enrich::{FusionStages, VendorLookup};
use crate::record::{Normalizer, PacketRecord, Protocol, DNS_QUERY_INFO, UNKNOWN_ADDR};
use crate::scan::ScanTracker;
use crate::score::compute_score;
use crate::tls::TlsAnalyzer;

/// One detected device, keyed by source address in first-seen order.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

/// The terminal artifact of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficReport {
    #[serde(rename = "score_global")]
    pub score: u32,
    #[serde(rename = "total_paquets")]
    pub total_packets: usize,
    #[serde(rename = "repartition_protocoles")]
    pub protocol_counts: BTreeMap<String, usize>,
    #[serde(rename = "alertes_securite")]
    pub alerts: Vec<Alert>,
    #[serde(rename = "appareils_detectes")]
    pub devices: Vec<Device>,
    #[serde(rename = "details_trafic")]
    pub records: Vec<PacketRecord>,
    /// Set when the run failed before analysis; callers must treat a present
    /// error as "no usable report".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// Records skipped as malformed, for observability. Not part of the
    /// serialized contract.
    #[serde(skip)]
    pub skipped: usize,
}

impl TrafficReport {
    /// Report for a run that failed before analysis: score 0, empty
    /// collections, error set.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            score: 0,
            total_packets: 0,
            protocol_counts: BTreeMap::new(),
            alerts: Vec::new(),
            devices: Vec::new(),
            records: Vec::new(),
            error: Some(error.into()),
            interface: None,
            duration_secs: None,
            skipped: 0,
        }
    }
}

/// Capture metadata carried through to the report and SIEM export.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub interface: Option<String>,
    pub duration_secs: Option<u64>,
}

/// One configured pipeline. Capabilities are injected and scoped to the
/// owner's lifetime.
pub struct Pipeline {
    config: Config,
    tls: Option<TlsAnalyzer>,
    vendor: Arc<dyn VendorLookup>,
    fusion: FusionStages,
}

impl Pipeline {
    pub fn new(
        config: Config,
        tls: Option<TlsAnalyzer>,
        vendor: Arc<dyn VendorLookup>,
        fusion: FusionStages,
    ) -> Self {
        Self {
            config,
            tls,
            vendor,
            fusion,
        }
    }

    /// Analyzes one finite batch of decoded packet trees.
    pub async fn run(&self, packets: &[Value], meta: RunMeta) -> TrafficReport {
        let analysis = &self.config.analysis;
        let normalizer = Normalizer::new(self.tls.as_ref());
        let mut tracker = ScanTracker::new(analysis.scan_port_threshold);

        let mut records: Vec<PacketRecord> = Vec::with_capacity(packets.len());
        let mut alerts: Vec<Alert> = Vec::new();
        let mut protocol_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut devices: Vec<Device> = Vec::new();
        let mut seen_devices: HashSet<String> = HashSet::new();
        let mut http_records = 0usize;
        let mut skipped = 0usize;

        for raw in packets {
            let mut record = match normalizer.normalize(raw) {
                Ok(record) => record,
                Err(reason) => {
                    skipped += 1;
                    debug!("Skipping malformed record: {}", reason);
                    continue;
                }
            };

            if let Some(ref mac) = record.mac {
                record.vendor = self.vendor.lookup(mac);
            }

            if record.src != UNKNOWN_ADDR && seen_devices.insert(record.src.clone()) {
                devices.push(Device {
                    ip: record.src.clone(),
                    mac: record.mac.clone(),
                    vendor: record.vendor.clone(),
                });
            }

            *protocol_counts.entry(record.proto.to_string()).or_default() += 1;

            if record.proto == Protocol::Http {
                http_records += 1;
                if record.cleartext_auth {
                    alerts.push(Alert::new(
                        AlertCategory::Credential,
                        format!("cleartext credentials to {}", record.service),
                    ));
                }
            }

            if let Some(ref tls) = record.tls {
                if tls.suspicious {
                    alerts.push(Alert::new(
                        AlertCategory::TlsSuspicious,
                        format!(
                            "suspicious TLS ({}): {}",
                            record.src,
                            tls.risk_reasons.join(", ")
                        ),
                    ));
                }
            }

            if let Some(port) = record.dest_port {
                tracker.observe(&record.src, &record.dst, port);
            }

            records.push(record);
        }

        alerts.extend(tracker.finalize());

        // Fusion stages operate on materialized snapshots, never on the
        // run's mutable state.
        let snapshot = Arc::new(records);
        let addresses = Arc::new(unique_addresses(&snapshot));
        let domains = Arc::new(unique_domains(&snapshot));
        alerts.extend(self.fusion.run(snapshot.clone(), addresses, domains).await);

        let score = compute_score(analysis, http_records, &alerts);
        let alerts = alert::dedupe(alerts);

        // Truncation happens last, after every stage that needs the full set.
        let mut records = Arc::try_unwrap(snapshot).unwrap_or_else(|arc| (*arc).clone());
        records.reverse();
        records.truncate(analysis.max_records);

        info!(
            "Analysis complete: {} packets, {} skipped, {} alerts, score {}",
            packets.len(),
            skipped,
            alerts.len(),
            score
        );

        TrafficReport {
            score,
            total_packets: packets.len(),
            protocol_counts,
            alerts,
            devices,
            records,
            error: None,
            interface: meta.interface,
            duration_secs: meta.duration_secs,
            skipped,
        }
    }
}

/// Unique source and destination addresses, first-seen order.
fn unique_addresses(records: &[PacketRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for record in records {
        for addr in [&record.src, &record.dst] {
            if addr != UNKNOWN_ADDR && seen.insert(addr.clone()) {
                out.push(addr.clone());
            }
        }
    }
    out
}

/// Unique queried/contacted domains: DNS query names and TLS SNI values.
/// A DNS record whose query name was not extracted carries only the display
/// placeholder and contributes nothing.
fn unique_domains(records: &[PacketRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for record in records {
        let domain = match record.proto {
            Protocol::Dns if !record.info.is_empty() && record.info != DNS_QUERY_INFO => {
                Some(record.info.clone())
            }
            _ => record.tls.as_ref().and_then(|t| t.sni.clone()),
        };
        if let Some(d) = domain {
            if seen.insert(d.clone()) {
                out.push(d);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::NullVendorLookup;
    use serde_json::json;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Config::default(),
            Some(TlsAnalyzer::new()),
            Arc::new(NullVendorLookup),
            FusionStages::disabled(),
        )
    }

    fn dns_packet(src: &str, name: &str) -> Value {
        json!({
            "_source": {"layers": {
                "frame": {"frame.time_epoch": "1714000000.0", "frame.len": "80"},
                "ip": {"ip.src": src, "ip.dst": "8.8.8.8"},
                "udp": {"udp.dstport": "53"},
                "dns": {"Queries": {
                    "q": {"dns.qry.name": name}
                }}
            }}
        })
    }

    fn tcp_packet(src: &str, dst: &str, port: u16, epoch: f64) -> Value {
        json!({
            "_source": {"layers": {
                "frame": {"frame.time_epoch": epoch.to_string(), "frame.len": "100"},
                "ip": {"ip.src": src, "ip.dst": dst},
                "tcp": {"tcp.dstport": port.to_string()}
            }}
        })
    }

    fn http_auth_packet(src: &str) -> Value {
        json!({
            "_source": {"layers": {
                "ip": {"ip.src": src, "ip.dst": "93.184.216.34"},
                "tcp": {"tcp.dstport": "80"},
                "http": {
                    "http.host": "example.org",
                    "http.request.uri": "/admin",
                    "http.authorization": "Basic dXNlcjpwYXNz"
                }
            }}
        })
    }

    #[tokio::test]
    async fn test_scenario_dns_google() {
        let packets = vec![dns_packet("192.168.1.2", "google.com")];
        let report = pipeline().run(&packets, RunMeta::default()).await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].proto, Protocol::Dns);
        assert_eq!(report.records[0].service, "Google");
        assert_eq!(report.protocol_counts.get("DNS"), Some(&1));
        assert_eq!(report.score, 100);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_scenario_credential_caps_score() {
        let mut packets = vec![http_auth_packet("192.168.1.2")];
        // Plenty of clean traffic does not lift the cap.
        for i in 0..5 {
            packets.push(dns_packet("192.168.1.2", &format!("host{i}.example")));
        }

        let report = pipeline().run(&packets, RunMeta::default()).await;
        assert!(report
            .alerts
            .iter()
            .any(|a| a.category == AlertCategory::Credential
                && a.text.contains("credential")));
        assert!(report.score <= 45);
    }

    #[tokio::test]
    async fn test_scenario_port_scan_scores_75() {
        let packets: Vec<Value> = (0..20)
            .map(|i| tcp_packet("10.0.0.5", "10.0.0.9", 1000 + i, 1714000000.0 + i as f64))
            .collect();

        let report = pipeline().run(&packets, RunMeta::default()).await;
        let scan_alerts: Vec<_> = report
            .alerts
            .iter()
            .filter(|a| a.category == AlertCategory::Scan)
            .collect();
        assert_eq!(scan_alerts.len(), 1);
        assert!(scan_alerts[0].text.contains("10.0.0.5 -> 10.0.0.9"));
        assert_eq!(report.score, 75);
    }

    #[tokio::test]
    async fn test_malformed_record_skip_isolation() {
        let mut packets: Vec<Value> = (0..5)
            .map(|i| tcp_packet("10.0.0.1", "10.0.0.2", 443, 1714000000.0 + i as f64))
            .collect();
        packets.insert(2, json!({"garbage": true}));

        let report = pipeline().run(&packets, RunMeta::default()).await;
        assert_eq!(report.records.len(), 5);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total_packets, 6);
    }

    #[tokio::test]
    async fn test_truncation_most_recent_first() {
        let packets: Vec<Value> = (0..12_000)
            .map(|i| tcp_packet("10.0.0.1", "10.0.0.2", 443, 1714000000.0 + i as f64))
            .collect();

        let mut config = Config::default();
        config.analysis.scan_port_threshold = usize::MAX; // single port anyway
        let pipeline = Pipeline::new(
            config,
            None,
            Arc::new(NullVendorLookup),
            FusionStages::disabled(),
        );

        let report = pipeline.run(&packets, RunMeta::default()).await;
        assert_eq!(report.records.len(), 10_000);
        assert_eq!(report.total_packets, 12_000);
        // Most recent first: the newest timestamp leads.
        assert!(report.records[0].timestamp > report.records[9_999].timestamp);
    }

    #[tokio::test]
    async fn test_devices_first_seen_once() {
        let packets = vec![
            tcp_packet("10.0.0.1", "10.0.0.2", 443, 1.0),
            tcp_packet("10.0.0.1", "10.0.0.3", 443, 2.0),
            tcp_packet("10.0.0.4", "10.0.0.2", 443, 3.0),
        ];

        let report = pipeline().run(&packets, RunMeta::default()).await;
        let ips: Vec<_> = report.devices.iter().map(|d| d.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.4"]);
    }

    #[tokio::test]
    async fn test_empty_batch_scores_100() {
        let report = pipeline().run(&[], RunMeta::default()).await;
        assert_eq!(report.score, 100);
        assert_eq!(report.total_packets, 0);
        assert!(report.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_report_contract_field_names() {
        let packets = vec![dns_packet("192.168.1.2", "google.com")];
        let report = pipeline().run(&packets, RunMeta::default()).await;

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("score_global").is_some());
        assert!(value.get("total_paquets").is_some());
        assert!(value.get("repartition_protocoles").is_some());
        assert!(value.get("alertes_securite").is_some());
        assert!(value.get("appareils_detectes").is_some());
        assert!(value.get("details_trafic").is_some());
    }

    #[test]
    fn test_failed_report_shape() {
        let report = TrafficReport::failed("tshark exploded");
        assert_eq!(report.score, 0);
        assert!(report.records.is_empty());
        assert_eq!(report.error.as_deref(), Some("tshark exploded"));
    }

    #[tokio::test]
    async fn test_unique_domains_from_dns_and_sni() {
        let packets = vec![
            dns_packet("192.168.1.2", "google.com"),
            dns_packet("192.168.1.2", "google.com"),
            dns_packet("192.168.1.2", "example.org"),
        ];
        let report = pipeline().run(&packets, RunMeta::default()).await;
        let domains = unique_domains(&report.records);
        assert_eq!(domains.len(), 2);
    }

    #[tokio::test]
    async fn test_nameless_dns_query_yields_no_domain() {
        // A DNS layer without a parseable Queries sub-tree keeps its display
        // placeholder, which must never reach the domain snapshot.
        let packets = vec![json!({
            "_source": {"layers": {
                "ip": {"ip.src": "192.168.1.2", "ip.dst": "8.8.8.8"},
                "udp": {"udp.dstport": "53"},
                "dns": {}
            }}
        })];

        let report = pipeline().run(&packets, RunMeta::default()).await;
        assert_eq!(report.records[0].info, DNS_QUERY_INFO);
        assert!(unique_domains(&report.records).is_empty());
    }
}

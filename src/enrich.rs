//! Enrichment capabilities and fusion stages.
//!
//! External collaborators (MAC vendor database, anomaly model, threat-intel
//! backend) are consumed through capability traits injected into the
//! pipeline, scoped to the caller's lifetime - never process-wide singletons.
//!
//! The two fusion stages are independent and run concurrently, each against
//! an already-materialized snapshot of the record set and with an explicit
//! timeout. A stage that is absent, errors or times out degrades to "no
//! enrichment"; it never fails the pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertCategory};
use crate::error::EnrichmentError;
use crate::record::PacketRecord;

/// Maps a MAC address to a hardware vendor name.
pub trait VendorLookup: Send + Sync {
    fn lookup(&self, mac: &str) -> Option<String>;
}

/// Vendor lookup that knows nothing. Used when enrichment is disabled.
pub struct NullVendorLookup;

impl VendorLookup for NullVendorLookup {
    fn lookup(&self, _mac: &str) -> Option<String> {
        None
    }
}

/// Detects statistical anomalies over the full record set.
/// Returns human-readable finding strings; the fusion stage tags them.
pub trait AnomalyDetector: Send + Sync {
    fn detect(&self, records: &[PacketRecord]) -> Result<Vec<String>, EnrichmentError>;
}

/// Checks unique addresses and domains against a threat-intel backend.
pub trait ThreatIntel: Send + Sync {
    fn check(
        &self,
        addresses: &[String],
        domains: &[String],
    ) -> Result<Vec<String>, EnrichmentError>;
}

/// The optional fusion stages of one pipeline run.
pub struct FusionStages {
    pub anomaly: Option<Arc<dyn AnomalyDetector>>,
    pub intel: Option<Arc<dyn ThreatIntel>>,
    pub timeout: Duration,
}

impl FusionStages {
    /// No enrichment at all.
    pub fn disabled() -> Self {
        Self {
            anomaly: None,
            intel: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Runs both enabled stages concurrently against record and indicator
    /// snapshots. Both complete (or time out) before this returns.
    pub async fn run(
        &self,
        records: Arc<Vec<PacketRecord>>,
        addresses: Arc<Vec<String>>,
        domains: Arc<Vec<String>>,
    ) -> Vec<Alert> {
        let anomaly_task = self.run_anomaly(records);
        let intel_task = self.run_intel(addresses, domains);

        let (mut alerts, intel_alerts) = tokio::join!(anomaly_task, intel_task);
        alerts.extend(intel_alerts);
        alerts
    }

    async fn run_anomaly(&self, records: Arc<Vec<PacketRecord>>) -> Vec<Alert> {
        let Some(detector) = self.anomaly.clone() else {
            return Vec::new();
        };

        let outcome = timeout(
            self.timeout,
            spawn_blocking(move || detector.detect(&records)),
        )
        .await;

        match flatten(outcome, self.timeout) {
            Ok(findings) => {
                debug!("Anomaly fusion produced {} findings", findings.len());
                findings
                    .into_iter()
                    .map(|text| Alert::new(AlertCategory::Anomaly, text))
                    .collect()
            }
            Err(e) => {
                warn!("Anomaly fusion degraded to no enrichment: {}", e);
                Vec::new()
            }
        }
    }

    async fn run_intel(
        &self,
        addresses: Arc<Vec<String>>,
        domains: Arc<Vec<String>>,
    ) -> Vec<Alert> {
        let Some(intel) = self.intel.clone() else {
            return Vec::new();
        };

        let outcome = timeout(
            self.timeout,
            spawn_blocking(move || intel.check(&addresses, &domains)),
        )
        .await;

        match flatten(outcome, self.timeout) {
            Ok(matches) => {
                debug!("Threat-intel fusion produced {} matches", matches.len());
                matches
                    .into_iter()
                    .map(|text| Alert::new(AlertCategory::ThreatIntel, text))
                    .collect()
            }
            Err(e) => {
                warn!("Threat-intel fusion degraded to no enrichment: {}", e);
                Vec::new()
            }
        }
    }
}

type StageOutcome = Result<
    Result<Result<Vec<String>, EnrichmentError>, tokio::task::JoinError>,
    tokio::time::error::Elapsed,
>;

/// Collapses the timeout/join/capability error layers into one.
fn flatten(outcome: StageOutcome, limit: Duration) -> Result<Vec<String>, EnrichmentError> {
    match outcome {
        Err(_) => Err(EnrichmentError::Timeout(limit.as_secs())),
        Ok(Err(join)) => Err(EnrichmentError::Unavailable(join.to_string())),
        Ok(Ok(result)) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAnomalies(Vec<String>);

    impl AnomalyDetector for FixedAnomalies {
        fn detect(&self, _records: &[PacketRecord]) -> Result<Vec<String>, EnrichmentError> {
            Ok(self.0.clone())
        }
    }

    struct FailingIntel;

    impl ThreatIntel for FailingIntel {
        fn check(
            &self,
            _addresses: &[String],
            _domains: &[String],
        ) -> Result<Vec<String>, EnrichmentError> {
            Err(EnrichmentError::Unavailable("backend offline".into()))
        }
    }

    struct SlowIntel;

    impl ThreatIntel for SlowIntel {
        fn check(
            &self,
            _addresses: &[String],
            _domains: &[String],
        ) -> Result<Vec<String>, EnrichmentError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(vec!["too late".to_string()])
        }
    }

    fn snapshots() -> (Arc<Vec<PacketRecord>>, Arc<Vec<String>>, Arc<Vec<String>>) {
        (
            Arc::new(Vec::new()),
            Arc::new(Vec::new()),
            Arc::new(Vec::new()),
        )
    }

    #[tokio::test]
    async fn test_disabled_stages_produce_nothing() {
        let (records, addrs, domains) = snapshots();
        let alerts = FusionStages::disabled().run(records, addrs, domains).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_findings_tagged() {
        let stages = FusionStages {
            anomaly: Some(Arc::new(FixedAnomalies(vec![
                "atypical flow from 10.0.0.1".to_string(),
            ]))),
            intel: None,
            timeout: Duration::from_secs(1),
        };

        let (records, addrs, domains) = snapshots();
        let alerts = stages.run(records, addrs, domains).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Anomaly);
    }

    #[tokio::test]
    async fn test_failing_capability_degrades_gracefully() {
        let stages = FusionStages {
            anomaly: Some(Arc::new(FixedAnomalies(vec!["finding".to_string()]))),
            intel: Some(Arc::new(FailingIntel)),
            timeout: Duration::from_secs(1),
        };

        let (records, addrs, domains) = snapshots();
        let alerts = stages.run(records, addrs, domains).await;
        // The failing intel stage drops out; the anomaly stage still lands.
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Anomaly);
    }

    #[tokio::test]
    async fn test_slow_capability_times_out() {
        let stages = FusionStages {
            anomaly: None,
            intel: Some(Arc::new(SlowIntel)),
            timeout: Duration::from_millis(50),
        };

        let (records, addrs, domains) = snapshots();
        let alerts = stages.run(records, addrs, domains).await;
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_null_vendor_lookup() {
        assert!(NullVendorLookup.lookup("aa:bb:cc:dd:ee:ff").is_none());
    }
}

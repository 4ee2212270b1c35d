//! Port-scan detection.
//!
//! Accumulates, per (source, destination) pair, the set of distinct
//! destination ports touched across the batch. A pair crossing the threshold
//! yields exactly one alert regardless of how many ports it touched.
//! State is scoped to one pipeline run and never shared or persisted.

use std::collections::{HashMap, HashSet};

use crate::alert::{Alert, AlertCategory};
use crate::record::UNKNOWN_ADDR;

/// Stateful per-pair distinct-port tracker.
#[derive(Debug)]
pub struct ScanTracker {
    ports: HashMap<(String, String), HashSet<u16>>,
    threshold: usize,
}

impl ScanTracker {
    /// `threshold` is the number of distinct ports a pair may touch before
    /// being flagged; strictly more than `threshold` triggers an alert.
    pub fn new(threshold: usize) -> Self {
        Self {
            ports: HashMap::new(),
            threshold,
        }
    }

    /// Records one observed (source, destination, port) triple. Pairs with
    /// an unknown endpoint are ignored.
    pub fn observe(&mut self, src: &str, dst: &str, port: u16) {
        if src == UNKNOWN_ADDR || dst == UNKNOWN_ADDR {
            return;
        }
        self.ports
            .entry((src.to_string(), dst.to_string()))
            .or_default()
            .insert(port);
    }

    /// Number of pairs currently tracked.
    pub fn pair_count(&self) -> usize {
        self.ports.len()
    }

    /// Emits one scan alert per offending pair. Call once, after all records
    /// have been observed.
    pub fn finalize(self) -> Vec<Alert> {
        let mut offenders: Vec<_> = self
            .ports
            .into_iter()
            .filter(|(_, ports)| ports.len() > self.threshold)
            .collect();
        // Deterministic alert order regardless of hash iteration.
        offenders.sort_by(|a, b| a.0.cmp(&b.0));

        offenders
            .into_iter()
            .map(|((src, dst), ports)| {
                Alert::new(
                    AlertCategory::Scan,
                    format!("port scan: {src} -> {dst} ({} ports)", ports.len()),
                )
            })
            .collect()
    }
}

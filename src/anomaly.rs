//! Statistical anomaly detection over frame sizes.
//!
//! A z-score volume-outlier detector backing the [`AnomalyDetector`]
//! capability. The model is deliberately simple: the capability trait is the
//! contract, and any backend (including an external ML service) can be
//! injected in its place.

use std::collections::HashSet;

use statrs::statistics::{Data, Distribution};
use tracing::debug;

use crate::enrich::AnomalyDetector;
use crate::error::EnrichmentError;
use crate::record::PacketRecord;

/// Frame length above which an outlier reads as a possible exfiltration.
const LARGE_FRAME_BYTES: u32 = 1_400;
/// Frame length below which an outlier reads as a suspicious runt.
const SMALL_FRAME_BYTES: u32 = 60;

/// Z-score outlier detector over frame lengths.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    /// Z-score above which a frame counts as an outlier.
    pub z_threshold: f64,
    /// Minimum batch size; smaller batches produce no findings.
    pub min_samples: usize,
    /// Findings below this confidence percentage are dropped as noise.
    pub min_confidence: u32,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            min_samples: 20,
            min_confidence: 25,
        }
    }
}

impl ZScoreDetector {
    /// Maps a z-score to a 0-100 confidence percentage. The threshold maps
    /// to 0; twice the threshold and beyond maps to 100.
    fn confidence(&self, z: f64) -> u32 {
        let ratio = ((z - self.z_threshold) / self.z_threshold).clamp(0.0, 1.0);
        (ratio * 100.0) as u32
    }

    fn describe(frame_len: u32) -> &'static str {
        if frame_len > LARGE_FRAME_BYTES {
            "large transfer volume (possible exfiltration)"
        } else if frame_len < SMALL_FRAME_BYTES {
            "undersized frame"
        } else {
            "atypical flow"
        }
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn detect(&self, records: &[PacketRecord]) -> Result<Vec<String>, EnrichmentError> {
        let lengths: Vec<(usize, f64)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.frame_len.map(|l| (i, l as f64)))
            .collect();

        if lengths.len() < self.min_samples {
            debug!(
                "Anomaly detection skipped: {} sized records, need {}",
                lengths.len(),
                self.min_samples
            );
            return Ok(Vec::new());
        }

        let data = Data::new(lengths.iter().map(|(_, l)| *l).collect::<Vec<_>>());
        let mean = data.mean().unwrap_or(0.0);
        let std_dev = data.std_dev().unwrap_or(0.0);
        if std_dev <= f64::EPSILON {
            return Ok(Vec::new());
        }

        let mut findings = Vec::new();
        let mut seen = HashSet::new();

        for (index, length) in lengths {
            let z = (length - mean).abs() / std_dev;
            if z <= self.z_threshold {
                continue;
            }

            let confidence = self.confidence(z);
            if confidence < self.min_confidence {
                continue;
            }

            let record = &records[index];
            let reason = Self::describe(length as u32);
            let message = format!(
                "{reason} (src: {}, confidence: {confidence}%)",
                record.src
            );
            if seen.insert(message.clone()) {
                findings.push(message);
            }
        }

        Ok(findings)
    }
}

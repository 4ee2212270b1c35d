//! Domain-specific error types for NetScope.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy.

use thiserror::Error;

/// Errors that can occur while driving the dissection collaborator
/// (tshark/dumpcap). These are fatal to a run: no partial report is produced.
#[derive(Error, Debug)]
pub enum DissectError {
    #[error("Capture file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to launch dissector '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dissector exited with status {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },

    #[error("Dissector produced unparseable JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("Capture failed on interface '{interface}': {stderr}")]
    CaptureFailed { interface: String, stderr: String },
}

/// Reason a single packet record was skipped during normalization.
/// Skips never abort the batch; they are counted and logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("Packet has no '_source.layers' tree")]
    NoLayers,

    #[error("Layer '{0}' has unexpected shape")]
    MalformedLayer(String),
}

/// Errors from optional enrichment stages. These degrade the report to
/// "no enrichment" for that stage; they never fail the pipeline.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Enrichment capability unavailable: {0}")]
    Unavailable(String),

    #[error("Enrichment request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Enrichment timed out after {0} seconds")]
    Timeout(u64),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;

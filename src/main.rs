//! NetScope: a traffic analysis and threat-scoring pipeline.
//!
//! Decodes packet captures through tshark, normalizes the decoded trees,
//! derives security alerts (cleartext credentials, suspicious TLS, port
//! scans, anomalies, threat-intel hits), and produces a single scored
//! report per run, optionally pushed to a SIEM collector.

mod alert;
mod anomaly;
mod config;
mod dissect;
mod enrich;
mod error;
mod intel;
mod pipeline;
mod record;
mod scan;
mod score;
mod service;
mod siem;
mod tls;
mod vendor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use crate::anomaly::ZScoreDetector;
use crate::config::Config;
use crate::enrich::{FusionStages, NullVendorLookup, VendorLookup};
use crate::error::Result;
use crate::intel::RestIntelClient;
use crate::pipeline::{Pipeline, RunMeta, TrafficReport};
use crate::tls::TlsAnalyzer;
use crate::vendor::OuiVendorLookup;

#[derive(Parser)]
#[command(name = "netscope", version, about = "Network traffic audit engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an existing capture file
    Analyze {
        /// Capture file to analyze (pcap/pcapng).
        file: PathBuf,
        /// Wireshark display filter applied during dissection.
        #[arg(short = 'Y', long)]
        filter: Option<String>,
        /// Report rendering.
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
        /// Push the report to the configured SIEM endpoint.
        #[arg(long)]
        siem: bool,
    },
    /// Capture live traffic for a bounded duration, then analyze it
    Capture {
        /// Interface to capture on.
        #[arg(short, long)]
        interface: Option<String>,
        /// Capture duration in seconds.
        #[arg(short, long)]
        duration: Option<u64>,
        /// Where to write the capture file (default: temp file).
        #[arg(short, long)]
        write: Option<PathBuf>,
        /// Use the native capture engine / raised buffers.
        #[arg(long)]
        high_performance: bool,
        /// Report rendering.
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
        /// Push the report to the configured SIEM endpoint.
        #[arg(long)]
        siem: bool,
    },
    /// List capture-capable interfaces
    ListInterfaces,
    /// Write a default configuration file
    InitConfig {
        /// Destination path.
        #[arg(default_value = "netscope.toml")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "netscope=debug" } else { "netscope=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = Config::load_or_default(cli.config.as_deref());
    config.validate()?;

    match cli.command {
        Commands::Analyze {
            file,
            filter,
            output,
            siem,
        } => {
            let report =
                match dissect::dissect_file(&config.capture, &file, filter.as_deref()).await {
                    Ok(packets) => {
                        build_pipeline(&config)
                            .run(&packets, RunMeta::default())
                            .await
                    }
                    Err(e) => TrafficReport::failed(e.to_string()),
                };
            emit(&config, &report, output, siem).await?;
            if report.error.is_some() {
                std::process::exit(1);
            }
        }
        Commands::Capture {
            interface,
            duration,
            write,
            high_performance,
            output,
            siem,
        } => {
            let mut capture = config.capture.clone();
            if let Some(d) = duration {
                capture.duration_secs = d;
            }
            capture.high_performance |= high_performance;
            let interface = interface
                .or_else(|| capture.interface.clone())
                .context("no capture interface given (use --interface or the config file)")?;

            let out = write.unwrap_or_else(|| {
                std::env::temp_dir().join(format!("netscope-{}.pcap", std::process::id()))
            });
            let report = match capture_and_dissect(&capture, &interface, &out).await {
                Ok(packets) => {
                    let meta = RunMeta {
                        interface: Some(interface),
                        duration_secs: Some(capture.duration_secs),
                    };
                    build_pipeline(&config).run(&packets, meta).await
                }
                Err(e) => TrafficReport::failed(e.to_string()),
            };
            emit(&config, &report, output, siem).await?;
            if report.error.is_some() {
                std::process::exit(1);
            }
        }
        Commands::ListInterfaces => {
            for interface in dissect::list_interfaces(&config.capture).await? {
                println!("{interface}");
            }
        }
        Commands::InitConfig { path } => {
            std::fs::write(&path, Config::generate_default())
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

async fn capture_and_dissect(
    capture: &config::CaptureConfig,
    interface: &str,
    out: &Path,
) -> std::result::Result<Vec<serde_json::Value>, error::DissectError> {
    dissect::run_capture(capture, interface, out).await?;
    dissect::dissect_file(capture, out, None).await
}

/// Assembles the pipeline from the configuration: TLS analyzer with its
/// denylist, vendor lookup table, and the enabled fusion stages.
fn build_pipeline(config: &Config) -> Pipeline {
    let tls = if config.tls.enabled {
        Some(match config.tls.denylist_path {
            Some(ref path) => TlsAnalyzer::with_denylist(Path::new(path)),
            None => TlsAnalyzer::new(),
        })
    } else {
        None
    };

    let vendor: Arc<dyn VendorLookup> = if config.vendor.enabled {
        match config.vendor.oui_path {
            Some(ref path) => Arc::new(OuiVendorLookup::from_file(
                Path::new(path),
                config.vendor.cache_size,
            )),
            None => Arc::new(NullVendorLookup),
        }
    } else {
        Arc::new(NullVendorLookup)
    };

    let mut fusion = FusionStages::disabled();
    fusion.timeout = Duration::from_secs(config.fusion.timeout_secs);
    if config.fusion.anomaly_enabled {
        fusion.anomaly = Some(Arc::new(ZScoreDetector::default()));
    }
    if config.fusion.intel_enabled {
        match config.intel.url {
            Some(ref url) => {
                match RestIntelClient::new(
                    url,
                    config.intel.api_key.as_deref(),
                    config.intel.verify_certs,
                    Duration::from_secs(config.fusion.timeout_secs),
                ) {
                    Ok(client) => fusion.intel = Some(Arc::new(client)),
                    Err(e) => warn!("Threat intel disabled: {}", e),
                }
            }
            None => warn!("Threat intel enabled but no endpoint configured"),
        }
    }

    Pipeline::new(config.clone(), tls, vendor, fusion)
}

async fn emit(
    config: &Config,
    report: &TrafficReport,
    output: OutputFormat,
    push_siem: bool,
) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print_text(report),
    }
    if push_siem {
        siem::push(&config.siem, report).await;
    }
    Ok(())
}

fn print_text(report: &TrafficReport) {
    println!("=== NetScope Audit Report ===");
    if let Some(ref error) = report.error {
        println!("  run failed: {error}");
        return;
    }
    println!("  score:    {}/100", report.score);
    println!("  packets:  {}", report.total_packets);
    if let Some(ref interface) = report.interface {
        println!("  capture:  {interface}");
    }

    if !report.protocol_counts.is_empty() {
        println!("  protocols:");
        for (proto, count) in &report.protocol_counts {
            println!("    {proto:<8} {count}");
        }
    }

    if report.alerts.is_empty() {
        println!("  alerts:   none");
    } else {
        println!("  alerts ({}):", report.alerts.len());
        for alert in &report.alerts {
            println!("    [{}] {}", alert.category, alert.text);
        }
    }

    if !report.devices.is_empty() {
        println!("  devices ({}):", report.devices.len());
        for device in &report.devices {
            let mac = device.mac.as_deref().unwrap_or("-");
            let vendor = device.vendor.as_deref().unwrap_or("-");
            println!("    {:<16} {mac} {vendor}", device.ip);
        }
    }
}

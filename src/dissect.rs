//! Packet dissection via the tshark/dumpcap collaborators.
//!
//! All protocol decoding is delegated: tshark turns a capture file into a
//! JSON array of decoded packet trees, and the capture path shells out to
//! tshark or dumpcap to produce the pcap in the first place. This module
//! only builds command lines, checks exit status, and parses stdout.

use std::path::Path;
use std::process::Output;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::error::DissectError;

/// Decodes a capture file into packet trees.
///
/// An empty decode (filter matched nothing, or an empty capture) yields an
/// empty batch, not an error.
pub async fn dissect_file(
    config: &CaptureConfig,
    path: &Path,
    display_filter: Option<&str>,
) -> Result<Vec<Value>, DissectError> {
    if !path.exists() {
        return Err(DissectError::FileNotFound(path.display().to_string()));
    }

    let args = dissect_args(path, display_filter);
    debug!("Running {} {}", config.tshark_path, args.join(" "));

    let output = run(&config.tshark_path, &args).await?;
    if !output.status.success() {
        return Err(DissectError::ProcessFailed {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let packets = parse_packets(&output.stdout)?;
    info!("Dissected {} packets from {}", packets.len(), path.display());
    Ok(packets)
}

/// Captures live traffic to a pcap file for a bounded duration.
///
/// High-performance mode uses the native dumpcap engine on Linux and raised
/// kernel buffers elsewhere. A failed capture removes the partial output
/// file before returning.
pub async fn run_capture(
    config: &CaptureConfig,
    interface: &str,
    out: &Path,
) -> Result<(), DissectError> {
    let (program, args) = capture_command(config, interface, out);
    info!(
        "Capturing on '{}' for {}s via {}",
        interface, config.duration_secs, program
    );

    let output = run(program, &args).await?;
    if !output.status.success() {
        let _ = tokio::fs::remove_file(out).await;
        return Err(DissectError::CaptureFailed {
            interface: interface.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!("Capture complete: {}", out.display());
    Ok(())
}

/// Lists capture-capable interfaces as reported by `tshark -D`.
pub async fn list_interfaces(config: &CaptureConfig) -> Result<Vec<String>, DissectError> {
    let output = run(&config.tshark_path, &["-D".to_string()]).await?;
    if !output.status.success() {
        return Err(DissectError::ProcessFailed {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(parse_interfaces(&output.stdout))
}

async fn run(program: &str, args: &[String]) -> Result<Output, DissectError> {
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| DissectError::Spawn {
            program: program.to_string(),
            source,
        })
}

fn dissect_args(path: &Path, display_filter: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-r".to_string(),
        path.display().to_string(),
        "-T".to_string(),
        "json".to_string(),
    ];
    if let Some(filter) = display_filter {
        args.push("-Y".to_string());
        args.push(filter.to_string());
    }
    args
}

/// Chooses program and arguments for the capture run.
fn capture_command<'a>(
    config: &'a CaptureConfig,
    interface: &str,
    out: &Path,
) -> (&'a str, Vec<String>) {
    let native_dumpcap = config.high_performance && cfg!(target_os = "linux");
    let program = if native_dumpcap {
        config.dumpcap_path.as_str()
    } else {
        config.tshark_path.as_str()
    };

    let mut args = vec![
        "-i".to_string(),
        interface.to_string(),
        "-a".to_string(),
        format!("duration:{}", config.duration_secs),
        "-w".to_string(),
        out.display().to_string(),
        "-q".to_string(),
    ];
    if config.high_performance && !native_dumpcap {
        args.push("-B".to_string());
        args.push("256".to_string());
    }
    if let Some(ref bpf) = config.bpf_filter {
        args.push("-f".to_string());
        args.push(bpf.clone());
    }
    (program, args)
}

/// Parses `tshark -D` output: numbered lines like `1. eth0 (Ethernet)`.
fn parse_interfaces(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| {
            let rest = line.split_once(". ").map(|(_, r)| r)?;
            Some(rest.split_whitespace().next()?.to_string())
        })
        .collect()
}

fn parse_packets(stdout: &[u8]) -> Result<Vec<Value>, DissectError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_dissect_args_without_filter() {
        let args = dissect_args(Path::new("/tmp/a.pcap"), None);
        assert_eq!(args, vec!["-r", "/tmp/a.pcap", "-T", "json"]);
    }

    #[test]
    fn test_dissect_args_with_filter() {
        let args = dissect_args(Path::new("/tmp/a.pcap"), Some("tcp.port == 443"));
        assert_eq!(args[4], "-Y");
        assert_eq!(args[5], "tcp.port == 443");
    }

    #[test]
    fn test_capture_command_default_uses_tshark() {
        let config = CaptureConfig::default();
        let (program, args) = capture_command(&config, "eth0", Path::new("/tmp/out.pcap"));
        assert_eq!(program, "tshark");
        assert!(args.contains(&"duration:30".to_string()));
        assert!(args.contains(&"-q".to_string()));
        assert!(!args.contains(&"-B".to_string()));
    }

    #[test]
    fn test_capture_command_bpf_filter() {
        let mut config = CaptureConfig::default();
        config.bpf_filter = Some("not port 22".to_string());
        let (_, args) = capture_command(&config, "eth0", Path::new("/tmp/out.pcap"));
        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[pos + 1], "not port 22");
    }

    #[test]
    fn test_capture_command_high_performance() {
        let mut config = CaptureConfig::default();
        config.high_performance = true;
        let (program, args) = capture_command(&config, "eth0", Path::new("/tmp/out.pcap"));
        if cfg!(target_os = "linux") {
            assert_eq!(program, "dumpcap");
            assert!(!args.contains(&"-B".to_string()));
        } else {
            assert_eq!(program, "tshark");
            assert!(args.contains(&"-B".to_string()));
        }
    }

    #[test]
    fn test_parse_interfaces() {
        let out = b"1. eth0 (Ethernet)\n2. lo (Loopback)\n3. any\n";
        assert_eq!(parse_interfaces(out), vec!["eth0", "lo", "any"]);
    }

    #[test]
    fn test_parse_packets_empty_output() {
        assert!(parse_packets(b"").unwrap().is_empty());
        assert!(parse_packets(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_packets_array() {
        let packets = parse_packets(br#"[{"_source": {"layers": {}}}]"#).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_parse_packets_garbage() {
        assert!(parse_packets(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_dissect_missing_file() {
        let config = CaptureConfig::default();
        let result = dissect_file(&config, &PathBuf::from("/nonexistent/x.pcap"), None).await;
        assert!(matches!(result, Err(DissectError::FileNotFound(_))));
    }
}

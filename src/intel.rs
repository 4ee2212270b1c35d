//! Threat-intelligence lookups.
//!
//! A REST [`ThreatIntel`] implementation speaking the attribute-search shape
//! used by MISP-style backends. Private address ranges are filtered before
//! querying; individual lookup failures are logged and skipped so one flaky
//! indicator never suppresses the rest.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::enrich::ThreatIntel;
use crate::error::EnrichmentError;

/// Address prefixes never sent to the backend.
const PRIVATE_PREFIXES: &[&str] = &["192.168.", "10.", "172.16.", "127."];

/// REST client for an indicator-search endpoint.
pub struct RestIntelClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl RestIntelClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        verify_certs: bool,
        timeout: Duration,
    ) -> Result<Self, EnrichmentError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|e| EnrichmentError::Unavailable(e.to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_certs)
            .default_headers(headers)
            .user_agent("netscope-intel/0.1")
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Searches the backend for one indicator value of the given type.
    /// Returns the describing event info of the first hit, if any.
    fn search(&self, value: &str, attribute_type: &str) -> Option<String> {
        let url = format!("{}/attributes/restSearch", self.base_url);
        let body = json!({ "value": value, "type": attribute_type });

        let response = match self.http.post(&url).json(&body).send() {
            Ok(r) => r,
            Err(e) => {
                warn!("Intel lookup failed for {}: {}", value, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Intel backend returned {} for {}",
                response.status(),
                value
            );
            return None;
        }

        let parsed: SearchResponse = match response.json() {
            Ok(p) => p,
            Err(e) => {
                warn!("Intel response unparseable for {}: {}", value, e);
                return None;
            }
        };

        parsed.response.attributes.into_iter().next().map(|hit| {
            hit.event
                .and_then(|e| e.info)
                .unwrap_or_else(|| "unknown threat".to_string())
        })
    }
}

impl ThreatIntel for RestIntelClient {
    fn check(
        &self,
        addresses: &[String],
        domains: &[String],
    ) -> Result<Vec<String>, EnrichmentError> {
        let mut matches = Vec::new();

        for ip in addresses.iter().filter(|ip| is_public(ip)) {
            if let Some(event) = self.search(ip, "ip-dst") {
                matches.push(format!("known malicious address: {ip} ({event})"));
            }
        }

        for domain in domains.iter().filter(|d| !d.is_empty()) {
            if let Some(event) = self.search(domain, "domain") {
                matches.push(format!("known malicious domain: {domain} ({event})"));
            }
        }

        debug!(
            "Intel check: {} addresses, {} domains, {} matches",
            addresses.len(),
            domains.len(),
            matches.len()
        );
        Ok(matches)
    }
}

/// True when the address should be sent to the backend at all.
pub fn is_public(address: &str) -> bool {
    !address.is_empty()
        && address != "?"
        && !PRIVATE_PREFIXES.iter().any(|p| address.starts_with(p))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    response: AttributeList,
}

#[derive(Debug, Default, Deserialize)]
struct AttributeList {
    #[serde(rename = "Attribute", default)]
    attributes: Vec<AttributeHit>,
}

#[derive(Debug, Deserialize)]
struct AttributeHit {
    #[serde(rename = "Event")]
    event: Option<EventInfo>,
}

#[derive(Debug, Deserialize)]
struct EventInfo {
    info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges_filtered() {
        assert!(!is_public("192.168.1.10"));
        assert!(!is_public("10.0.0.5"));
        assert!(!is_public("172.16.4.4"));
        assert!(!is_public("127.0.0.1"));
        assert!(!is_public("?"));
        assert!(!is_public(""));
    }

    #[test]
    fn test_public_addresses_pass() {
        assert!(is_public("8.8.8.8"));
        assert!(is_public("45.33.32.156"));
        assert!(is_public("2001:db8::1"));
    }

    #[test]
    fn test_search_response_parsing() {
        let payload = r#"{
            "response": {
                "Attribute": [
                    {"Event": {"info": "Cobalt Strike C2"}},
                    {"Event": {"info": "second hit"}}
                ]
            }
        }"#;

        let parsed: SearchResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.response.attributes.len(), 2);
        assert_eq!(
            parsed.response.attributes[0]
                .event
                .as_ref()
                .and_then(|e| e.info.as_deref()),
            Some("Cobalt Strike C2")
        );
    }

    #[test]
    fn test_empty_search_response() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.response.attributes.is_empty());
    }
}

//! Record normalization: turns one raw decoded-packet tree (as emitted by
//! `tshark -T json`) into a strongly typed [`PacketRecord`].
//!
//! The dissector emits field values either as scalars or as single-element
//! arrays depending on version; [`LayerView`] absorbs both shapes so no
//! downstream stage ever touches the raw tree. A malformed record yields a
//! [`SkipReason`] and is dropped from the batch without aborting it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::SkipReason;
use crate::service;
use crate::tls::{TlsAnalyzer, TlsFingerprint};

/// Sentinel used when neither an IPv4 nor an IPv6 address is present.
pub const UNKNOWN_ADDR: &str = "?";

/// Info placeholder for a DNS record whose query name could not be
/// extracted. Display-only; never a real domain.
pub const DNS_QUERY_INFO: &str = "DNS query";

/// Inferred protocol of a packet. Application layers take precedence over
/// transport labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Dns,
    Http,
    Https,
    Other,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Dns => write!(f, "DNS"),
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Other => write!(f, "OTHER"),
        }
    }
}

/// One decoded packet, immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub src: String,
    pub dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub proto: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_port: Option<u16>,
    pub service: String,
    pub info: String,
    /// Frame length in bytes, when the dissector exposed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_len: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsFingerprint>,
    /// Set when an HTTP record carries a cleartext authorization header.
    /// The pipeline raises the credential alert from this flag.
    #[serde(skip)]
    pub cleartext_auth: bool,
}

/// Read-only view over one dissected layer (a JSON object of field → value).
///
/// Field values may be scalars or single-element arrays; both are normalized
/// to the scalar.
#[derive(Debug, Clone, Copy)]
pub struct LayerView<'a> {
    map: &'a serde_json::Map<String, Value>,
}

impl<'a> LayerView<'a> {
    pub fn new(value: &'a Value) -> Option<Self> {
        value.as_object().map(|map| Self { map })
    }

    /// Returns the named field as a string, unwrapping one level of array.
    pub fn field(&self, name: &str) -> Option<String> {
        scalar(self.map.get(name)?)
    }

    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Returns a nested object field as another view.
    pub fn child(&self, name: &str) -> Option<LayerView<'a>> {
        LayerView::new(self.map.get(name)?)
    }

    /// Iterates nested object values (e.g. the entries of a DNS `Queries`
    /// sub-tree, which are keyed by a display string).
    pub fn children(&self) -> impl Iterator<Item = LayerView<'a>> {
        self.map.values().filter_map(LayerView::new)
    }

    /// Collects every string value of the named field, preserving order.
    /// A scalar yields one element; an array yields each element.
    pub fn field_all(&self, name: &str) -> Vec<String> {
        match self.map.get(name) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
            Some(v) => scalar(v).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// Coerces a scalar-or-single-element-array value to a string.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(scalar),
        _ => None,
    }
}

/// The record normalizer. Holds the TLS analyzer so encrypted-traffic
/// enrichment happens at the same boundary as the rest of the extraction.
pub struct Normalizer<'a> {
    tls: Option<&'a TlsAnalyzer>,
}

impl<'a> Normalizer<'a> {
    pub fn new(tls: Option<&'a TlsAnalyzer>) -> Self {
        Self { tls }
    }

    /// Extracts a typed record from one raw decoded-packet tree.
    pub fn normalize(&self, raw: &Value) -> Result<PacketRecord, SkipReason> {
        let layers = raw
            .pointer("/_source/layers")
            .and_then(LayerView::new)
            .ok_or(SkipReason::NoLayers)?;

        let timestamp = extract_timestamp(&layers);
        let (src, dst) = extract_addresses(&layers);
        let mac = extract_mac(&layers);
        let frame_len = layers
            .child("frame")
            .and_then(|f| f.field("frame.len"))
            .and_then(|l| l.parse::<u32>().ok());

        let tcp = layers.child("tcp");
        let udp = layers.child("udp");
        let dest_port = tcp
            .and_then(|t| t.field("tcp.dstport"))
            .or_else(|| udp.and_then(|u| u.field("udp.dstport")))
            .and_then(|p| p.parse::<u16>().ok());

        // Application-layer precedence over transport labels.
        let proto = if layers.has("dns") {
            Protocol::Dns
        } else if layers.has("http") {
            Protocol::Http
        } else if layers.has("tls") {
            Protocol::Https
        } else if tcp.is_some() {
            Protocol::Tcp
        } else if udp.is_some() {
            Protocol::Udp
        } else {
            Protocol::Other
        };

        let mut info = String::new();
        let mut label: Option<String> = None;
        let mut tls_fp: Option<TlsFingerprint> = None;
        let mut cleartext_auth = false;

        match proto {
            Protocol::Dns => {
                info = DNS_QUERY_INFO.to_string();
                if let Some(dns) = layers.child("dns") {
                    if let Some(name) = first_query_name(&dns) {
                        label = service::resolve(&name).map(str::to_string);
                        info = name;
                    }
                }
            }
            Protocol::Http => {
                if let Some(http) = layers.child("http") {
                    let host = http.field("http.host").unwrap_or_default();
                    let uri = http.field("http.request.uri").unwrap_or_default();
                    info = format!("{host}{uri}");
                    label = service::resolve(&host).map(str::to_string);
                    cleartext_auth = http.has("http.authorization");
                }
            }
            Protocol::Https => {
                if let Some(tls_layer) = layers.child("tls") {
                    if let Some(analyzer) = self.tls {
                        let fp = analyzer.analyze(&tls_layer);
                        if let Some(ref sni) = fp.sni {
                            label = service::resolve(sni).map(str::to_string);
                            info = format!("SNI: {sni}");
                        }
                        if let Some(ref hash) = fp.hash {
                            let short = &hash[..hash.len().min(6)];
                            info.push_str(&format!(" [fp: {short}...]"));
                        }
                        tls_fp = Some(fp);
                    } else if let Some(sni) =
                        tls_layer.field("tls.handshake.extensions_server_name")
                    {
                        label = service::resolve(&sni).map(str::to_string);
                        info = sni;
                    }
                }
            }
            _ => {}
        }

        let service = match label {
            Some(l) => l,
            None => match dest_port {
                Some(p) => service::resolve_port(p).to_string(),
                None => service::UNKNOWN_SERVICE.to_string(),
            },
        };

        Ok(PacketRecord {
            timestamp,
            src,
            dst,
            mac,
            vendor: None,
            proto,
            dest_port,
            service,
            info: info.trim().to_string(),
            frame_len,
            tls: tls_fp,
            cleartext_auth,
        })
    }
}

/// Timestamp extraction: numeric epoch first, then an ISO-8601 field, then
/// the capture-local clock. Never fails the record.
fn extract_timestamp(layers: &LayerView) -> DateTime<Utc> {
    let frame = layers.child("frame");

    if let Some(epoch) = frame.as_ref().and_then(|f| f.field("frame.time_epoch")) {
        if let Ok(secs) = epoch.parse::<f64>() {
            let nanos = (secs.fract() * 1e9) as u32;
            if let Some(ts) = DateTime::from_timestamp(secs.trunc() as i64, nanos) {
                return ts;
            }
        }
    }

    if let Some(iso) = frame.as_ref().and_then(|f| f.field("frame.time_utc")) {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&iso) {
            return ts.with_timezone(&Utc);
        }
    }

    Utc::now()
}

/// Address extraction: IPv4 fields preferred, then IPv6, then the sentinel.
fn extract_addresses(layers: &LayerView) -> (String, String) {
    let ip = layers.child("ip");
    let ipv6 = layers.child("ipv6");

    let src = ip
        .and_then(|l| l.field("ip.src"))
        .or_else(|| ipv6.and_then(|l| l.field("ipv6.src")))
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string());
    let dst = ip
        .and_then(|l| l.field("ip.dst"))
        .or_else(|| ipv6.and_then(|l| l.field("ipv6.dst")))
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string());

    (src, dst)
}

/// Source MAC from the ethernet layer, falling back to 802.11.
fn extract_mac(layers: &LayerView) -> Option<String> {
    layers
        .child("eth")
        .and_then(|l| l.field("eth.src"))
        .or_else(|| layers.child("wlan").and_then(|l| l.field("wlan.sa")))
}

/// First query name in a DNS layer's `Queries` sub-tree.
fn first_query_name(dns: &LayerView) -> Option<String> {
    dns.child("Queries")?
        .children()
        .find_map(|q| q.field("dns.qry.name"))
}

//! MAC vendor enrichment.
//!
//! Implements [`VendorLookup`] over an OUI prefix table loaded from disk,
//! with a bounded LRU cache in front. The table format is one entry per
//! line: `AA:BB:CC<TAB>Vendor Name` (IEEE OUI export style), `#` comments
//! and blank lines ignored.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use tracing::{debug, warn};

use crate::enrich::VendorLookup;

/// File-backed OUI vendor table.
pub struct OuiVendorLookup {
    table: HashMap<String, String>,
    cache: Mutex<LruCache<String, Option<String>>>,
}

impl OuiVendorLookup {
    /// Loads the table from a file. An unreadable file yields an empty
    /// table (and a warning); lookups then all miss.
    pub fn from_file(path: &Path, cache_size: usize) -> Self {
        let table = match std::fs::read_to_string(path) {
            Ok(content) => parse_oui_table(&content),
            Err(e) => {
                warn!("Failed to read OUI table {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        debug!("Loaded {} OUI prefixes", table.len());
        Self::from_table(table, cache_size)
    }

    pub fn from_table(table: HashMap<String, String>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("max(1) is nonzero");
        Self {
            table,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl VendorLookup for OuiVendorLookup {
    fn lookup(&self, mac: &str) -> Option<String> {
        let prefix = oui_prefix(mac)?;

        let mut cache = self.cache.lock().ok()?;
        if let Some(cached) = cache.get(&prefix) {
            return cached.clone();
        }

        let vendor = self.table.get(&prefix).cloned();
        cache.put(prefix, vendor.clone());
        vendor
    }
}

/// Normalizes a MAC address to its uppercase colon-separated OUI prefix
/// ("aa-bb-cc-dd-ee-ff" -> "AA:BB:CC"). Returns None for malformed input.
fn oui_prefix(mac: &str) -> Option<String> {
    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() < 3 || octets.iter().take(3).any(|o| o.len() != 2) {
        return None;
    }
    Some(
        octets[..3]
            .iter()
            .map(|o| o.to_uppercase())
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn parse_oui_table(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let (prefix, vendor) = line.split_once('\t').or_else(|| line.split_once("  "))?;
            let prefix = oui_prefix(prefix.trim())?;
            Some((prefix, vendor.trim().to_string()))
        })
        .collect()
}

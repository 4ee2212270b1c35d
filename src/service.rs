//! Service resolution: maps raw textual indicators (hostnames, SNI, query
//! names) and destination ports to a coarse human-readable service label.

/// Label used when no registry entry or port fallback applies.
pub const UNKNOWN_SERVICE: &str = "-";

/// Well-known consumer services, matched case-insensitively as substrings.
/// Order is priority order: the first match wins.
static KNOWN_SERVICES: &[(&str, &str)] = &[
    ("google", "Google"),
    ("facebook", "Facebook"),
    ("instagram", "Instagram"),
    ("whatsapp", "WhatsApp"),
    ("netflix", "Netflix"),
    ("youtube", "YouTube"),
    ("spotify", "Spotify"),
    ("apple", "Apple"),
    ("microsoft", "Microsoft"),
    ("amazon", "Amazon"),
    ("tiktok", "TikTok"),
    ("snapchat", "Snapchat"),
    ("twitch", "Twitch"),
    ("discord", "Discord"),
];

/// Resolves a hostname-like string to a service label.
/// Returns None when no registry entry matches.
pub fn resolve(text: &str) -> Option<&'static str> {
    if text.is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    KNOWN_SERVICES
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, label)| *label)
}

/// Port-based fallback, used only when no textual match exists.
pub fn resolve_port(port: u16) -> &'static str {
    match port {
        443 => "HTTPS",
        80 => "HTTP",
        53 => "DNS",
        22 => "SSH",
        445 => "SMB",
        _ => UNKNOWN_SERVICE,
    }
}

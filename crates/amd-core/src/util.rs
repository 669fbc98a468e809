//! Shared utility functions used across multiple modules.

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static PARTNER_ID_REJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid partner id regex"));

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Strip every character outside `[A-Za-z0-9_-]` from a partner identifier.
///
/// Non-conforming characters are dropped silently; the result may be empty.
pub fn sanitize_partner_id(value: &str) -> String {
    PARTNER_ID_REJECT
        .replace_all(value.trim(), "")
        .into_owned()
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SHA-256 hex digest; identical across builds and platforms.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Process-local fingerprint for logging identifiers without leaking them.
pub fn fingerprint(value: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" HOTEL1 ".to_string())),
            Some("HOTEL1".to_string())
        );
    }

    #[test]
    fn sanitize_partner_id_strips_foreign_characters() {
        assert_eq!(sanitize_partner_id(" HOTEL_1-a "), "HOTEL_1-a");
        assert_eq!(sanitize_partner_id("H<script>1"), "Hscript1");
        assert_eq!(sanitize_partner_id("ä ö/ü"), "");
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("/relative/path"));
    }

    #[test]
    fn sha256_hex_matches_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"service\x1fen"),
            "668a64582cd146b13779f1b4855e282fb94f3a7dcca0ec05acbc6ec261638560"
        );
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint("HOTEL1"), fingerprint("HOTEL1"));
        assert_ne!(fingerprint("HOTEL1"), fingerprint("HOTEL2"));
    }
}

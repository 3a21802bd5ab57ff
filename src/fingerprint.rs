//! Message and URL canonicalization helpers (§4.1).
//!
//! Dynamic tokens in a message (UUIDs, timestamps, large numbers) are
//! replaced with stable placeholders so that repeated console errors that
//! only differ by a generated id collapse to one fingerprint in the
//! checkpoint diff. Parsing never fails outward: unparseable input is
//! returned unchanged rather than surfaced as an error (§7).

use once_cell::sync::Lazy;
use regex::Regex;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?").unwrap()
});

static LARGE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4,}\b").unwrap());

/// Canonicalize a message for deduplication. Order matters: timestamps are
/// masked before large numbers, since a timestamp itself contains digit runs
/// that would otherwise be swallowed by the number mask first.
pub fn fingerprint_message(message: &str) -> String {
    let masked = UUID_RE.replace_all(message, "{uuid}");
    let masked = TIMESTAMP_RE.replace_all(&masked, "{ts}");
    let masked = LARGE_NUMBER_RE.replace_all(&masked, "{n}");
    masked.into_owned()
}

/// Parse `url` and return its path with query and fragment stripped.
/// Returns `/` for an empty path, and the input unchanged if it does not
/// parse as a URL.
pub fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

/// Normalize a resource URL for fingerprinting a baseline's resource list:
/// drop the query string but preserve any hash fragment.
pub fn normalize_resource_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// For `fetch`/`xmlhttprequest` resources, collapse everything past the
/// second path segment to `/*` once the path has at least three segments —
/// this treats `/api/users/123` and `/api/users/456` as the same dynamic
/// endpoint for causal-diff keying.
pub fn dynamic_api_path(resource_type: &str, url: &str) -> String {
    if resource_type != "fetch" && resource_type != "xmlhttprequest" {
        return normalize_resource_url(url);
    }
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let segments: Vec<String> = parsed
                .path()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            if segments.len() < 3 {
                return normalize_resource_url(url);
            }
            parsed.set_query(None);
            parsed.set_path(&format!("/{}/{}/*", segments[0], segments[1]));
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Format a byte count the way a human reads it: `<1024` as a bare integer,
/// `<1 MiB` as kilobytes, otherwise megabytes.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let bytes_f = bytes as f64;
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes_f < MIB {
        format!("{:.1}KB", bytes_f / KIB)
    } else {
        format!("{:.1}MB", bytes_f / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_uuid_then_timestamp_then_number() {
        let msg = "Error loading user 123e4567-e89b-12d3-a456-426614174000 at 2024-01-15T10:30:00Z after 123456 retries";
        let fp = fingerprint_message(msg);
        assert_eq!(
            fp,
            "Error loading user {uuid} at {ts} after {n} retries"
        );
    }

    #[test]
    fn fingerprint_is_idempotent() {
        let msg = "Failed batch 987654321 for request 550e8400-e29b-41d4-a716-446655440000";
        let once = fingerprint_message(msg);
        let twice = fingerprint_message(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn short_numbers_preserved() {
        let msg = "Retry 42 of 99";
        assert_eq!(fingerprint_message(msg), "Retry 42 of 99");
    }

    #[test]
    fn url_path_strips_query_and_fragment() {
        assert_eq!(url_path("https://x.test/api/users?x=1#frag"), "/api/users");
        assert_eq!(url_path("https://x.test"), "/");
        assert_eq!(url_path("not a url"), "not a url");
    }

    #[test]
    fn resource_url_keeps_fragment_drops_query() {
        let norm = normalize_resource_url("https://x.test/a.js?v=2#chunk");
        assert!(norm.contains("#chunk"));
        assert!(!norm.contains("v=2"));
    }

    #[test]
    fn dynamic_path_collapses_third_segment_for_fetch() {
        let a = dynamic_api_path("fetch", "https://x.test/api/users/123");
        let b = dynamic_api_path("fetch", "https://x.test/api/users/456");
        assert_eq!(a, b);
        assert_eq!(a, "https://x.test/api/users/*");
    }

    #[test]
    fn dynamic_path_untouched_for_short_paths_or_non_api_types() {
        assert_eq!(
            dynamic_api_path("fetch", "https://x.test/api"),
            "https://x.test/api"
        );
        assert_eq!(
            dynamic_api_path("script", "https://x.test/a/b/c"),
            "https://x.test/a/b/c"
        );
    }

    #[test]
    fn bytes_format_bands() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MB");
    }
}

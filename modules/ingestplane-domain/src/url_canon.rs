//! URL Canonicalizer (§4.1). Pure function: deterministic normalization and
//! content hash. Grounded on `normalize_url`/`canonical_hash` in the original
//! source's `app/core/urls.py`, extended with the per-host override table
//! `spec.md` names explicitly.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Per-host normalization policy, resolved by the admin-managed
/// `url_normalization_overrides` table (§6). Matching is longest
/// suffix-label match against the URL's host.
#[derive(Debug, Clone, Default)]
pub struct HostOverride {
    pub host_suffix: String,
    pub strip_www: bool,
    pub force_https: bool,
    pub strip_query_params: BTreeSet<String>,
    pub strip_query_prefixes: Vec<String>,
}

/// The full set of enabled overrides, queried fresh inside the same
/// transaction as every operation that normalizes a URL (§4.5, §4.6.2).
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    pub overrides: Vec<HostOverride>,
}

impl OverrideSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Longest suffix-label match: `"jobs.example.edu"` matches an override
    /// on `"example.edu"` (2 labels) in preference to one on `"edu"` (1
    /// label).
    fn best_match(&self, host: &str) -> Option<&HostOverride> {
        self.overrides
            .iter()
            .filter(|o| host_matches_suffix(host, &o.host_suffix))
            .max_by_key(|o| o.host_suffix.split('.').count())
    }
}

fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    if host == suffix {
        return true;
    }
    host.ends_with(suffix) && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}

static TRACKING_KEYS: [&str; 3] = ["ref", "fbclid", "gclid"];

fn is_tracking_param(key: &str, ov: Option<&HostOverride>) -> bool {
    let lower = key.to_lowercase();
    if lower.starts_with("utm_") || TRACKING_KEYS.contains(&lower.as_str()) {
        return true;
    }
    if let Some(ov) = ov {
        if ov.strip_query_params.contains(&lower) {
            return true;
        }
        if ov.strip_query_prefixes.iter().any(|p| lower.starts_with(p.as_str())) {
            return true;
        }
    }
    false
}

/// Normalize a raw URL string. Returns `None` if the URL cannot be parsed.
pub fn normalize_url(raw_url: &str, overrides: &OverrideSet) -> Option<String> {
    let mut parsed = url::Url::parse(raw_url.trim()).ok()?;

    let scheme = parsed.scheme().to_lowercase();
    let _ = parsed.set_scheme(&scheme);

    let host = parsed.host_str()?.to_lowercase();
    let ov = overrides.best_match(&host);

    let mut host = host;
    if let Some(ov) = ov {
        if ov.strip_www {
            if let Some(stripped) = host.strip_prefix("www.") {
                host = stripped.to_string();
            }
        }
    }

    let mut scheme = scheme;
    if let Some(ov) = ov {
        if ov.force_https {
            scheme = "https".to_string();
        }
    }

    // Default-port stripping happens naturally: we rebuild the authority
    // ourselves rather than keep url::Url's port, so :80/:443 never survive
    // unless the caller's scheme disagrees with the standard port.
    let port = parsed.port().filter(|&p| {
        !((scheme == "http" && p == 80) || (scheme == "https" && p == 443))
    });

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    } else if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !is_tracking_param(k, ov))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let query = if pairs.is_empty() {
        None
    } else {
        Some(
            pairs
                .into_iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k
                    } else {
                        format!(
                            "{}={}",
                            url::form_urlencoded::byte_serialize(k.as_bytes()).collect::<String>(),
                            url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()
                        )
                    }
                })
                .collect::<Vec<_>>()
                .join("&"),
        )
    };

    let authority = match port {
        Some(p) => format!("{host}:{p}"),
        None => host,
    };

    let mut normalized = format!("{scheme}://{authority}{path}");
    if let Some(q) = query {
        normalized.push('?');
        normalized.push_str(&q);
    }
    Some(normalized)
}

/// `canonical_hash = SHA-256(normalized_url)`, hex encoded.
pub fn canonical_hash(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(u: &str) -> String {
        normalize_url(u, &OverrideSet::empty()).unwrap()
    }

    #[test]
    fn strips_default_ports() {
        assert_eq!(norm("http://example.com:80/path"), "http://example.com/path");
        assert_eq!(norm("https://example.com:443/path"), "https://example.com/path");
        assert_eq!(norm("https://example.com:8443/path"), "https://example.com:8443/path");
    }

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(norm("HTTPS://Example.COM/Path"), "https://example.com/Path");
    }

    #[test]
    fn collapses_trailing_slash_but_keeps_root() {
        assert_eq!(norm("https://example.com/jobs/"), "https://example.com/jobs");
        assert_eq!(norm("https://example.com/"), "https://example.com/");
        assert_eq!(norm("https://example.com"), "https://example.com/");
    }

    #[test]
    fn drops_tracking_params_and_sorts_rest() {
        assert_eq!(
            norm("https://example.com/jobs?utm_source=feed&b=2&a=1&fbclid=xyz&ref=home&gclid=123"),
            "https://example.com/jobs?a=1&b=2"
        );
    }

    #[test]
    fn drops_fragment() {
        assert_eq!(norm("https://example.com/jobs#apply"), "https://example.com/jobs");
    }

    #[test]
    fn preserves_duplicate_and_blank_query_values() {
        assert_eq!(
            norm("https://example.com/jobs?tag=a&tag=b&blank="),
            "https://example.com/jobs?blank&tag=a&tag=b"
        );
    }

    #[test]
    fn override_strips_www_and_forces_https() {
        let overrides = OverrideSet {
            overrides: vec![HostOverride {
                host_suffix: "example.com".into(),
                strip_www: true,
                force_https: true,
                ..Default::default()
            }],
        };
        let out = normalize_url("http://www.example.com/jobs", &overrides).unwrap();
        assert_eq!(out, "https://example.com/jobs");
    }

    #[test]
    fn override_applies_longest_suffix_match() {
        let overrides = OverrideSet {
            overrides: vec![
                HostOverride {
                    host_suffix: "com".into(),
                    force_https: false,
                    ..Default::default()
                },
                HostOverride {
                    host_suffix: "jobs.example.com".into(),
                    force_https: true,
                    ..Default::default()
                },
            ],
        };
        let out = normalize_url("http://jobs.example.com/x", &overrides).unwrap();
        assert_eq!(out, "https://jobs.example.com/x");
    }

    #[test]
    fn override_custom_strip_query_param() {
        let overrides = OverrideSet {
            overrides: vec![HostOverride {
                host_suffix: "example.com".into(),
                strip_query_params: ["session".to_string()].into_iter().collect(),
                ..Default::default()
            }],
        };
        let out = normalize_url("https://example.com/x?a=1&session=abc", &overrides).unwrap();
        assert_eq!(out, "https://example.com/x?a=1");
    }

    #[test]
    fn normalization_is_idempotent() {
        // P8: canonical_hash(normalize(u)) stable under repeated normalization.
        let first = norm("HTTPS://Example.com:443/Jobs/?utm_source=x&b=2&a=1#frag");
        let second = normalize_url(&first, &OverrideSet::empty()).unwrap();
        assert_eq!(first, second);
        assert_eq!(canonical_hash(&first), canonical_hash(&second));
    }

    #[test]
    fn invalid_url_returns_none() {
        assert!(normalize_url("not a url", &OverrideSet::empty()).is_none());
    }

    #[test]
    fn canonical_hash_is_deterministic_sha256_hex() {
        let hash = canonical_hash("https://example.com/jobs");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, canonical_hash("https://example.com/jobs"));
        assert_ne!(hash, canonical_hash("https://example.com/jobs2"));
    }
}

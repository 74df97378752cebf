//! Projection Engine field resolution (§4.7, steps 1-4). Pure logic: given
//! an extract job's `result_json` and the owning discovery's fallback
//! fields, resolve the projectable posting fields and decide whether a
//! posting can be projected at all. The surrounding transactional steps
//! (trust policy lookup, dedupe query, insert/merge) live in
//! `ingestplane-repo` and call into this module plus `trust_policy` and
//! `dedupe`.
//!
//! Grounded on `repository.py`'s extract-result handling inside
//! `_apply_job_result` and the `ExtractResult`/`PostingProjection` sum
//! types named in spec's design notes.

use crate::coerce::{coerce_float, coerce_text, coerce_text_list};
use ingestplane_common::CandidateState;
use serde_json::Value;

/// Fallback fields pulled from the owning discovery row when the extract
/// payload omits them.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFallback {
    pub title_hint: Option<String>,
    pub organization_name_hint: Option<String>,
    pub url: Option<String>,
    pub normalized_url: Option<String>,
    pub canonical_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostingProjection {
    pub title: Option<String>,
    pub organization_name: Option<String>,
    pub canonical_url: Option<String>,
    pub normalized_url: Option<String>,
    pub canonical_hash: Option<String>,
    pub tags: Vec<String>,
    pub areas: Vec<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub description_text: Option<String>,
    pub application_url: Option<String>,
    pub deadline: Option<String>,
    pub source_refs: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub projection: PostingProjection,
    pub has_projection_signal: bool,
    pub can_project_posting: bool,
    pub dedupe_confidence: Option<f64>,
    pub risk_flags: Vec<String>,
    pub source_key: Option<String>,
    pub candidate_state_hint: Option<CandidateState>,
    /// The raw payload the projection was resolved from, for
    /// `extracted_fields` on the inserted candidate.
    pub raw_payload: Value,
}

const PROJECTION_KEYS: [&str; 13] = [
    "title",
    "organization_name",
    "canonical_url",
    "normalized_url",
    "canonical_hash",
    "tags",
    "areas",
    "country",
    "region",
    "city",
    "description_text",
    "application_url",
    "deadline",
];

/// Accepts both the nested `{"posting": {...}, ...}` shape and a flat
/// top-level shape — the projection engine MUST accept both (§6).
pub fn parse_extract_result(result_json: &Value, fallback: &DiscoveryFallback) -> ExtractResult {
    static EMPTY: std::sync::OnceLock<serde_json::Map<String, Value>> = std::sync::OnceLock::new();
    let empty = EMPTY.get_or_init(serde_json::Map::new);

    let obj = result_json.as_object();

    let nested_posting = obj.and_then(|o| o.get("posting")).and_then(|v| v.as_object());
    let projection_payload: &serde_json::Map<String, Value> = match nested_posting {
        Some(nested) => nested,
        None => obj.unwrap_or(empty),
    };

    let has_projection_signal = nested_posting.is_some()
        || PROJECTION_KEYS.iter().any(|key| {
            projection_payload.get(*key).map(|v| !v.is_null()).unwrap_or(false)
        })
        || obj.map(|o| o.contains_key("source_refs")).unwrap_or(false);

    let title = coerce_text(projection_payload.get("title")).or_else(|| fallback.title_hint.clone());
    let organization_name = coerce_text(projection_payload.get("organization_name"))
        .or_else(|| fallback.organization_name_hint.clone());
    let canonical_url = coerce_text(projection_payload.get("canonical_url"))
        .or_else(|| coerce_text(projection_payload.get("url")))
        .or_else(|| fallback.url.clone())
        .or_else(|| fallback.normalized_url.clone());
    let normalized_url = coerce_text(projection_payload.get("normalized_url"))
        .or_else(|| fallback.normalized_url.clone())
        .or_else(|| canonical_url.clone());
    let canonical_hash = coerce_text(projection_payload.get("canonical_hash"))
        .or_else(|| fallback.canonical_hash.clone());

    let can_project_posting = has_projection_signal
        && title.is_some()
        && organization_name.is_some()
        && canonical_url.is_some()
        && normalized_url.is_some()
        && canonical_hash.is_some();

    let projection = PostingProjection {
        title,
        organization_name,
        canonical_url,
        normalized_url,
        canonical_hash,
        tags: coerce_text_list(projection_payload.get("tags")),
        areas: coerce_text_list(projection_payload.get("areas")),
        country: coerce_text(projection_payload.get("country")),
        region: coerce_text(projection_payload.get("region")),
        city: coerce_text(projection_payload.get("city")),
        description_text: coerce_text(projection_payload.get("description_text")),
        application_url: coerce_text(projection_payload.get("application_url")),
        deadline: coerce_text(projection_payload.get("deadline")),
        source_refs: crate::coerce::coerce_json_list(projection_payload.get("source_refs")),
    };

    let dedupe_confidence = obj.and_then(|o| coerce_float(o.get("dedupe_confidence")));
    let risk_flags = obj.map(|o| coerce_text_list(o.get("risk_flags"))).unwrap_or_default();
    let source_key = obj.and_then(|o| coerce_text(o.get("source_key")));
    let candidate_state_hint = obj
        .and_then(|o| coerce_text(o.get("candidate_state")))
        .and_then(|s| s.parse::<CandidateState>().ok());

    ExtractResult {
        projection,
        has_projection_signal,
        can_project_posting,
        dedupe_confidence,
        risk_flags,
        source_key,
        candidate_state_hint,
        raw_payload: result_json.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> DiscoveryFallback {
        DiscoveryFallback {
            title_hint: Some("Fallback Title".into()),
            organization_name_hint: Some("Fallback Org".into()),
            url: Some("https://example.com/jobs/1".into()),
            normalized_url: Some("https://example.com/jobs/1".into()),
            canonical_hash: Some("abc123".into()),
        }
    }

    #[test]
    fn nested_posting_shape_is_authoritative() {
        let payload = serde_json::json!({
            "posting": {"title": "Nested Title", "organization_name": "Nested Org",
                        "canonical_url": "https://example.com/x", "normalized_url": "https://example.com/x",
                        "canonical_hash": "h1"},
            "dedupe_confidence": 0.8,
        });
        let result = parse_extract_result(&payload, &fallback());
        assert_eq!(result.projection.title.as_deref(), Some("Nested Title"));
        assert!(result.can_project_posting);
        assert_eq!(result.dedupe_confidence, Some(0.8));
    }

    #[test]
    fn top_level_shape_is_accepted() {
        let payload = serde_json::json!({
            "title": "Flat Title", "organization_name": "Flat Org",
            "canonical_url": "https://example.com/y", "normalized_url": "https://example.com/y",
            "canonical_hash": "h2",
        });
        let result = parse_extract_result(&payload, &fallback());
        assert_eq!(result.projection.title.as_deref(), Some("Flat Title"));
        assert!(result.can_project_posting);
    }

    #[test]
    fn missing_fields_fall_back_to_discovery_hints() {
        let payload = serde_json::json!({"description_text": "some text"});
        let result = parse_extract_result(&payload, &fallback());
        assert_eq!(result.projection.title.as_deref(), Some("Fallback Title"));
        assert_eq!(result.projection.organization_name.as_deref(), Some("Fallback Org"));
        assert!(result.can_project_posting);
    }

    #[test]
    fn no_projection_signal_and_no_fallback_is_not_projectable() {
        let payload = serde_json::json!({});
        let result = parse_extract_result(&payload, &DiscoveryFallback::default());
        assert!(!result.has_projection_signal);
        assert!(!result.can_project_posting);
    }

    #[test]
    fn candidate_state_hint_parses_known_values_only() {
        let payload = serde_json::json!({"candidate_state": "needs_review"});
        let result = parse_extract_result(&payload, &fallback());
        assert_eq!(result.candidate_state_hint, Some(CandidateState::NeedsReview));

        let payload = serde_json::json!({"candidate_state": "bogus"});
        let result = parse_extract_result(&payload, &fallback());
        assert_eq!(result.candidate_state_hint, None);
    }
}

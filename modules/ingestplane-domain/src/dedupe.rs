//! Dedupe Scorer (§4.2). Pure scoring function over candidate-pair
//! snapshots, plus the merge-decision policy. Grounded on
//! `app/services/dedupe.py` (`score_candidate_pair`, `evaluate_merge_policy`,
//! `extract_named_entities`, `extract_contact_domains`).

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use ingestplane_common::MergeDecision;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b[A-Z0-9._%+-]+@([A-Z0-9.-]+\.[A-Z]{2,})\b").unwrap())
}

fn stop_words() -> &'static BTreeSet<&'static str> {
    static WORDS: OnceLock<BTreeSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        ["a", "an", "and", "at", "for", "from", "in", "of", "on", "or", "the", "to", "with"]
            .into_iter()
            .collect()
    })
}

#[derive(Debug, Clone, Default)]
pub struct NamedEntities {
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
    pub people: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSnapshot {
    pub candidate_id: String,
    pub canonical_hash: Option<String>,
    pub normalized_url: Option<String>,
    pub canonical_url: Option<String>,
    pub application_url: Option<String>,
    pub title: Option<String>,
    pub organization_name: Option<String>,
    pub description_text: Option<String>,
    pub tags: Vec<String>,
    pub areas: Vec<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub named_entities: NamedEntities,
    pub contact_domains: Vec<String>,
    pub has_posting: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DedupeScore {
    pub candidate_id: String,
    pub confidence: f64,
    pub strong_signals: Vec<&'static str>,
    pub risk_flags: Vec<String>,
    pub has_posting: bool,
    pub components: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct DedupePolicyDecision {
    pub decision: MergeDecision,
    pub primary_candidate_id: Option<String>,
    pub confidence: Option<f64>,
    pub risk_flags: Vec<String>,
    pub metadata: serde_json::Value,
}

pub struct MergeThresholds {
    pub auto_merge_threshold: f64,
    pub review_threshold: f64,
    pub ambiguity_delta: f64,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 0.93,
            review_threshold: 0.72,
            ambiguity_delta: 0.03,
        }
    }
}

pub fn evaluate_merge_policy(
    incoming: &CandidateSnapshot,
    existing: &[CandidateSnapshot],
    thresholds: &MergeThresholds,
) -> DedupePolicyDecision {
    let mut scores: Vec<DedupeScore> =
        existing.iter().map(|row| score_candidate_pair(incoming, row)).collect();

    if scores.is_empty() {
        return DedupePolicyDecision {
            decision: MergeDecision::None,
            primary_candidate_id: None,
            confidence: None,
            risk_flags: vec![],
            metadata: serde_json::json!({"reason": "no_merge_candidates"}),
        };
    }

    scores.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });

    let best = scores[0].clone();
    let mut merged_flags = best.risk_flags.clone();

    if scores.len() > 1 {
        let second = &scores[1];
        if second.confidence >= thresholds.review_threshold
            && (best.confidence - second.confidence).abs() <= thresholds.ambiguity_delta
        {
            merged_flags.push("conflict_multiple_close_matches".to_string());
        }
    }
    let merged_flags = dedupe_text_list(&merged_flags);
    let has_conflict_flag = merged_flags.iter().any(|f| f.starts_with("conflict_"));
    let has_strong_signal = !best.strong_signals.is_empty();

    let decision = if best.confidence >= thresholds.auto_merge_threshold
        && has_strong_signal
        && best.has_posting
        && !has_conflict_flag
    {
        MergeDecision::AutoMerged
    } else if best.confidence >= thresholds.review_threshold || has_conflict_flag {
        MergeDecision::NeedsReview
    } else if has_strong_signal {
        MergeDecision::Rejected
    } else {
        MergeDecision::None
    };

    let primary_candidate_id = if matches!(decision, MergeDecision::None) {
        None
    } else {
        Some(best.candidate_id.clone())
    };

    let ranked_preview: Vec<serde_json::Value> = scores
        .iter()
        .take(3)
        .map(|row| {
            serde_json::json!({
                "candidate_id": row.candidate_id,
                "confidence": round4(row.confidence),
                "strong_signals": row.strong_signals,
                "risk_flags": row.risk_flags,
            })
        })
        .collect();

    DedupePolicyDecision {
        decision,
        primary_candidate_id,
        confidence: Some(round4(best.confidence)),
        risk_flags: merged_flags,
        metadata: serde_json::json!({
            "auto_merge_threshold": thresholds.auto_merge_threshold,
            "review_threshold": thresholds.review_threshold,
            "ambiguity_delta": thresholds.ambiguity_delta,
            "selected_candidate_id": best.candidate_id,
            "selected_components": best.components,
            "selected_strong_signals": best.strong_signals,
            "selected_risk_flags": best.risk_flags,
            "ranked_candidates": ranked_preview,
        }),
    }
}

pub fn score_candidate_pair(incoming: &CandidateSnapshot, existing: &CandidateSnapshot) -> DedupeScore {
    let mut strong_signals: Vec<&'static str> = Vec::new();
    let mut score = 0.0f64;

    if equals(&incoming.canonical_hash, &existing.canonical_hash) {
        strong_signals.push("canonical_hash");
        score += 0.65;
    }
    if equals(&incoming.normalized_url, &existing.normalized_url) {
        strong_signals.push("normalized_url");
        score += 0.20;
    }
    if equals(&incoming.canonical_url, &existing.canonical_url) {
        strong_signals.push("canonical_url");
        score += 0.15;
    }
    if equals(&incoming.application_url, &existing.application_url) {
        strong_signals.push("application_url");
        score += 0.10;
    }

    let title_similarity = jaccard(&tokenize(incoming.title.as_deref()), &tokenize(existing.title.as_deref()));
    let organization_similarity =
        organization_similarity(incoming.organization_name.as_deref(), existing.organization_name.as_deref());
    let phrase_similarity = jaccard(&phrase_tokens(incoming), &phrase_tokens(existing));

    let medium_score = 0.45 * title_similarity + 0.25 * organization_similarity + 0.10 * phrase_similarity;
    score += medium_score;

    let org_ner_overlap = jaccard(
        &normalized_set(&incoming.named_entities.organizations),
        &normalized_set(&existing.named_entities.organizations),
    );
    let location_overlap = jaccard(
        &normalized_set(&incoming.named_entities.locations).union(&location_set(incoming)).cloned().collect(),
        &normalized_set(&existing.named_entities.locations).union(&location_set(existing)).cloned().collect(),
    );
    let person_overlap = jaccard(
        &normalized_set(&incoming.named_entities.people),
        &normalized_set(&existing.named_entities.people),
    );
    let domain_overlap = jaccard(&domain_set(incoming), &domain_set(existing));
    let contact_domain_overlap = jaccard(
        &normalized_set(&incoming.contact_domains),
        &normalized_set(&existing.contact_domains),
    );

    let tie_break_score = 0.10 * org_ner_overlap
        + 0.05 * location_overlap
        + 0.05 * person_overlap
        + 0.05 * domain_overlap
        + 0.05 * contact_domain_overlap;
    score += tie_break_score;

    if strong_signals.is_empty() {
        score = score.min(0.89);
    }

    let confidence = score.min(0.9999);
    let risk_flags = score_risk_flags(
        incoming,
        existing,
        confidence,
        &strong_signals,
        title_similarity,
        organization_similarity,
    );

    DedupeScore {
        candidate_id: existing.candidate_id.clone(),
        confidence,
        strong_signals,
        risk_flags,
        has_posting: existing.has_posting,
        components: serde_json::json!({
            "title_similarity": round4(title_similarity),
            "organization_similarity": round4(organization_similarity),
            "phrase_similarity": round4(phrase_similarity),
            "org_ner_overlap": round4(org_ner_overlap),
            "location_overlap": round4(location_overlap),
            "person_overlap": round4(person_overlap),
            "domain_overlap": round4(domain_overlap),
            "contact_domain_overlap": round4(contact_domain_overlap),
            "medium_score": round4(medium_score),
            "tie_break_score": round4(tie_break_score),
        }),
    }
}

/// Accepts both a dict-of-lists shape (`org`/`orgs`/`organization`/...) and a
/// list-of-tagged-spans shape (`{"type"|"label", "text"|"value"}`).
pub fn extract_named_entities(payload: &serde_json::Value) -> NamedEntities {
    let Some(obj) = payload.as_object() else {
        return NamedEntities::default();
    };
    let raw = obj
        .get("ner")
        .or_else(|| obj.get("named_entities"))
        .or_else(|| obj.get("entities"));

    let mut organizations = Vec::new();
    let mut locations = Vec::new();
    let mut people = Vec::new();

    match raw {
        Some(serde_json::Value::Object(raw)) => {
            for key in ["org", "orgs", "organization", "organizations"] {
                organizations.extend(text_values(raw.get(key)));
            }
            for key in ["location", "locations", "place", "places"] {
                locations.extend(text_values(raw.get(key)));
            }
            for key in ["person", "people", "persons"] {
                people.extend(text_values(raw.get(key)));
            }
        }
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                let Some(item) = item.as_object() else { continue };
                let label = item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .or_else(|| item.get("label").and_then(|v| v.as_str()))
                    .unwrap_or("")
                    .trim()
                    .to_uppercase();
                let value = item
                    .get("text")
                    .and_then(|v| v.as_str())
                    .or_else(|| item.get("value").and_then(|v| v.as_str()));
                let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
                    continue;
                };
                match label.as_str() {
                    "ORG" | "ORGANIZATION" => organizations.push(value),
                    "LOC" | "LOCATION" | "GPE" => locations.push(value),
                    "PERSON" | "PER" => people.push(value),
                    _ => {}
                }
            }
        }
        _ => {}
    }

    NamedEntities {
        organizations: dedupe_text_list(&organizations),
        locations: dedupe_text_list(&locations),
        people: dedupe_text_list(&people),
    }
}

pub fn extract_contact_domains(payload: &serde_json::Value) -> Vec<String> {
    let Some(obj) = payload.as_object() else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    for key in ["contact_email", "contact_emails", "email", "emails", "contact"] {
        candidates.extend(text_values(obj.get(key)));
    }
    let domains: Vec<String> = candidates
        .iter()
        .flat_map(|c| email_re().captures_iter(c).map(|cap| cap[1].to_lowercase()))
        .collect();
    dedupe_text_list(&domains)
}

fn score_risk_flags(
    incoming: &CandidateSnapshot,
    existing: &CandidateSnapshot,
    confidence: f64,
    strong_signals: &[&'static str],
    title_similarity: f64,
    organization_similarity: f64,
) -> Vec<String> {
    let mut flags = Vec::new();
    if strong_signals.is_empty() && confidence >= 0.72 {
        flags.push("manual_review_low_signal".to_string());
    }

    if let (Some(ich), Some(ech)) = (&incoming.canonical_hash, &existing.canonical_hash) {
        if ich != ech
            && (equals(&incoming.normalized_url, &existing.normalized_url)
                || equals(&incoming.canonical_url, &existing.canonical_url))
        {
            flags.push("conflict_hash_mismatch".to_string());
        }
    }

    if !strong_signals.is_empty() {
        if let (Some(io), Some(eo)) = (&incoming.organization_name, &existing.organization_name) {
            if !io.is_empty() && !eo.is_empty() && organization_similarity < 0.25 {
                flags.push("conflict_organization_mismatch".to_string());
            }
        }
        if let (Some(it), Some(et)) = (&incoming.title, &existing.title) {
            if !it.is_empty() && !et.is_empty() && title_similarity < 0.25 {
                flags.push("conflict_title_mismatch".to_string());
            }
        }
        if let (Some(ia), Some(ea)) = (&incoming.application_url, &existing.application_url) {
            if ia != ea {
                flags.push("conflict_application_url_mismatch".to_string());
            }
        }
    }

    dedupe_text_list(&flags)
}

fn equals(left: &Option<String>, right: &Option<String>) -> bool {
    matches!((left, right), (Some(l), Some(r)) if !l.is_empty() && !r.is_empty() && l == r)
}

fn phrase_tokens(c: &CandidateSnapshot) -> BTreeSet<String> {
    let mut terms: Vec<String> = Vec::new();
    terms.extend(c.tags.iter().cloned());
    terms.extend(c.areas.iter().cloned());
    if let Some(d) = &c.description_text {
        terms.push(d.clone());
    }
    tokenize(Some(&terms.join(" ")))
}

fn organization_similarity(left: Option<&str>, right: Option<&str>) -> f64 {
    match (left, right) {
        (Some(l), Some(r)) if !l.is_empty() && !r.is_empty() => {
            if l.to_lowercase() == r.to_lowercase() {
                1.0
            } else {
                jaccard(&tokenize(Some(l)), &tokenize(Some(r)))
            }
        }
        _ => 0.0,
    }
}

fn location_set(c: &CandidateSnapshot) -> BTreeSet<String> {
    normalized_set(&[
        c.country.clone().unwrap_or_default(),
        c.region.clone().unwrap_or_default(),
        c.city.clone().unwrap_or_default(),
    ])
}

fn domain_set(c: &CandidateSnapshot) -> BTreeSet<String> {
    let domains: Vec<String> = [&c.canonical_url, &c.normalized_url, &c.application_url]
        .into_iter()
        .filter_map(|raw| parse_host(raw.as_deref()))
        .collect();
    normalized_set(&domains)
}

fn parse_host(raw_url: Option<&str>) -> Option<String> {
    let raw = raw_url?;
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?.trim().to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(right).count();
    let union = left.union(right).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn normalized_set(values: &[String]) -> BTreeSet<String> {
    values.iter().filter(|v| !v.is_empty()).map(|v| v.to_lowercase()).collect()
}

fn tokenize(value: Option<&str>) -> BTreeSet<String> {
    let Some(value) = value else { return BTreeSet::new() };
    token_re()
        .find_iter(&value.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| !stop_words().contains(t.as_str()))
        .collect()
}

fn text_values(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                vec![]
            } else {
                vec![t.to_string()]
            }
        }
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => vec![],
    }
}

fn dedupe_text_list(values: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for value in values {
        let stripped = value.trim();
        if stripped.is_empty() {
            continue;
        }
        let key = stripped.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        out.push(stripped.to_string());
    }
    out
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str) -> CandidateSnapshot {
        CandidateSnapshot {
            candidate_id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn exact_canonical_hash_match_is_strong_signal() {
        let mut a = snapshot("a");
        a.canonical_hash = Some("h1".into());
        let mut b = snapshot("b");
        b.canonical_hash = Some("h1".into());
        let score = score_candidate_pair(&a, &b);
        assert!(score.strong_signals.contains(&"canonical_hash"));
        assert!(score.confidence >= 0.65);
    }

    #[test]
    fn no_strong_signal_caps_score_below_09() {
        let mut a = snapshot("a");
        a.title = Some("Research Assistant Biology Lab".into());
        a.organization_name = Some("Example University".into());
        let mut b = snapshot("b");
        b.title = Some("Research Assistant Biology Lab".into());
        b.organization_name = Some("Example University".into());
        let score = score_candidate_pair(&a, &b);
        assert!(score.strong_signals.is_empty());
        assert!(score.confidence <= 0.89);
    }

    #[test]
    fn no_merge_candidates_gives_none_decision() {
        let incoming = snapshot("new");
        let decision = evaluate_merge_policy(&incoming, &[], &MergeThresholds::default());
        assert!(matches!(decision.decision, MergeDecision::None));
        assert!(decision.primary_candidate_id.is_none());
    }

    #[test]
    fn auto_merge_requires_strong_signal_posting_and_no_conflict() {
        let mut incoming = snapshot("new");
        incoming.canonical_hash = Some("h1".into());
        incoming.normalized_url = Some("https://example.com/jobs/1".into());
        let mut existing = snapshot("old");
        existing.canonical_hash = Some("h1".into());
        existing.normalized_url = Some("https://example.com/jobs/1".into());
        existing.has_posting = true;

        let decision = evaluate_merge_policy(&incoming, &[existing], &MergeThresholds::default());
        assert!(matches!(decision.decision, MergeDecision::AutoMerged));
        assert_eq!(decision.primary_candidate_id.as_deref(), Some("old"));
    }

    #[test]
    fn auto_merge_blocked_without_existing_posting() {
        let mut incoming = snapshot("new");
        incoming.canonical_hash = Some("h1".into());
        let mut existing = snapshot("old");
        existing.canonical_hash = Some("h1".into());
        existing.has_posting = false;

        let decision = evaluate_merge_policy(&incoming, &[existing], &MergeThresholds::default());
        assert!(matches!(decision.decision, MergeDecision::NeedsReview));
    }

    #[test]
    fn conflicting_hash_with_matching_url_flags_conflict() {
        let mut incoming = snapshot("new");
        incoming.canonical_hash = Some("h1".into());
        incoming.normalized_url = Some("https://example.com/jobs/1".into());
        let mut existing = snapshot("old");
        existing.canonical_hash = Some("h2".into());
        existing.normalized_url = Some("https://example.com/jobs/1".into());

        let score = score_candidate_pair(&incoming, &existing);
        assert!(score.risk_flags.contains(&"conflict_hash_mismatch".to_string()));
    }

    #[test]
    fn named_entities_accept_dict_of_lists_shape() {
        let payload = serde_json::json!({"ner": {"org": ["Acme Inc"], "location": "Minneapolis"}});
        let ner = extract_named_entities(&payload);
        assert_eq!(ner.organizations, vec!["Acme Inc".to_string()]);
        assert_eq!(ner.locations, vec!["Minneapolis".to_string()]);
    }

    #[test]
    fn named_entities_accept_tagged_span_list_shape() {
        let payload = serde_json::json!({"entities": [
            {"type": "ORG", "text": "Acme Inc"},
            {"label": "gpe", "value": "Saint Paul"},
        ]});
        let ner = extract_named_entities(&payload);
        assert_eq!(ner.organizations, vec!["Acme Inc".to_string()]);
        assert_eq!(ner.locations, vec!["Saint Paul".to_string()]);
    }

    #[test]
    fn contact_domains_extracted_and_deduped() {
        let payload = serde_json::json!({"emails": ["a@Example.com", "b@example.com", "not-an-email"]});
        let domains = extract_contact_domains(&payload);
        assert_eq!(domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn ranking_breaks_ties_by_candidate_id_ascending() {
        let incoming = snapshot("new");
        let a = snapshot("b-candidate");
        let b = snapshot("a-candidate");
        // both score 0 (no signals at all) -> decision none either way, but
        // exercise score_candidate_pair + sort path directly for determinism.
        let mut scores = vec![score_candidate_pair(&incoming, &a), score_candidate_pair(&incoming, &b)];
        scores.sort_by(|x, y| {
            y.confidence.partial_cmp(&x.confidence).unwrap().then_with(|| x.candidate_id.cmp(&y.candidate_id))
        });
        assert_eq!(scores[0].candidate_id, "a-candidate");
    }
}

//! Trust-Policy Resolver (§4.4). Pure logic only: synthesizing a default
//! policy by trust level, and computing the publish decision. The lookup
//! across `source_key_hint` → `module:{id}` → `default:{trust_level}` reads
//! from storage and lives in `ingestplane-repo`; this module is handed the
//! already-resolved policy row (or `None`).
//!
//! Grounded on `repository.py`'s `resolve_source_trust_policy` /
//! `_resolve_publish_decision`.

use ingestplane_common::{CandidateState, ModuleTrustLevel, PostingStatus};

#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub auto_publish: bool,
    pub requires_moderation: bool,
    /// Raw `rules_json`; only `min_confidence` is consulted today (§9 Open
    /// Question — unrecognized keys are ignored, not rejected).
    pub rules_json: serde_json::Value,
}

/// Synthesize a default policy when no explicit row matched the lookup
/// order (§4.4): trusted/semi_trusted auto-publish without moderation;
/// untrusted always requires moderation and never auto-publishes.
pub fn default_policy(trust_level: ModuleTrustLevel) -> TrustPolicy {
    match trust_level {
        ModuleTrustLevel::Trusted | ModuleTrustLevel::SemiTrusted => TrustPolicy {
            auto_publish: true,
            requires_moderation: false,
            rules_json: serde_json::json!({}),
        },
        ModuleTrustLevel::Untrusted => TrustPolicy {
            auto_publish: false,
            requires_moderation: true,
            rules_json: serde_json::json!({}),
        },
    }
}

/// `0.72` for trusted/semi_trusted, `None` for untrusted — overridden by a
/// policy's `rules_json.min_confidence` when present and in `[0, 1]`.
pub fn min_confidence(trust_level: ModuleTrustLevel, policy: &TrustPolicy) -> Option<f64> {
    let base = match trust_level {
        ModuleTrustLevel::Trusted | ModuleTrustLevel::SemiTrusted => Some(0.72),
        ModuleTrustLevel::Untrusted => None,
    };
    let override_value = policy
        .rules_json
        .get("min_confidence")
        .and_then(|v| v.as_f64())
        .filter(|v| (0.0..=1.0).contains(v));
    override_value.or(base)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReason {
    TrustedAutoPublish,
    SemiTrustedAutoPublish,
    BelowMinConfidence,
    SemiTrustedConflictFlag,
    UntrustedRequiresModeration,
    PolicyDisablesAutoPublish,
    PolicyRequiresModeration,
    NotProjectable,
}

impl PublishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrustedAutoPublish => "trusted_auto_publish",
            Self::SemiTrustedAutoPublish => "semi_trusted_auto_publish",
            Self::BelowMinConfidence => "below_min_confidence",
            Self::SemiTrustedConflictFlag => "semi_trusted_conflict_flag",
            Self::UntrustedRequiresModeration => "untrusted_requires_moderation",
            Self::PolicyDisablesAutoPublish => "policy_disables_auto_publish",
            Self::PolicyRequiresModeration => "policy_requires_moderation",
            Self::NotProjectable => "not_projectable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishDecision {
    pub publish: bool,
    pub candidate_state: CandidateState,
    pub posting_status: PostingStatus,
    pub reason: PublishReason,
}

/// `(candidate_state, posting_status) = (published, active)` on publish,
/// else `(needs_review, archived)`.
pub fn resolve_publish_decision(
    can_project_posting: bool,
    trust_level: ModuleTrustLevel,
    policy: &TrustPolicy,
    dedupe_confidence: Option<f64>,
    risk_flags: &[String],
) -> PublishDecision {
    if !can_project_posting {
        return not_publish(PublishReason::NotProjectable);
    }

    let min_conf = min_confidence(trust_level, policy);
    let meets_confidence = match min_conf {
        None => true,
        Some(threshold) => dedupe_confidence.map(|c| c >= threshold).unwrap_or(false),
    };
    let has_conflict_flag = risk_flags.iter().any(|f| f.contains("conflict"));

    let (publish, reason) = match trust_level {
        ModuleTrustLevel::Trusted => {
            if !policy.auto_publish {
                (false, PublishReason::PolicyDisablesAutoPublish)
            } else if policy.requires_moderation {
                (false, PublishReason::PolicyRequiresModeration)
            } else if !meets_confidence {
                (false, PublishReason::BelowMinConfidence)
            } else {
                (true, PublishReason::TrustedAutoPublish)
            }
        }
        ModuleTrustLevel::SemiTrusted => {
            if !policy.auto_publish {
                (false, PublishReason::PolicyDisablesAutoPublish)
            } else if policy.requires_moderation {
                (false, PublishReason::PolicyRequiresModeration)
            } else if !meets_confidence {
                (false, PublishReason::BelowMinConfidence)
            } else if has_conflict_flag {
                (false, PublishReason::SemiTrustedConflictFlag)
            } else {
                (true, PublishReason::SemiTrustedAutoPublish)
            }
        }
        ModuleTrustLevel::Untrusted => (false, PublishReason::UntrustedRequiresModeration),
    };

    if publish {
        PublishDecision {
            publish: true,
            candidate_state: CandidateState::Published,
            posting_status: PostingStatus::Active,
            reason,
        }
    } else {
        not_publish(reason)
    }
}

fn not_publish(reason: PublishReason) -> PublishDecision {
    PublishDecision {
        publish: false,
        candidate_state: CandidateState::NeedsReview,
        posting_status: PostingStatus::Archived,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(auto_publish: bool, requires_moderation: bool) -> TrustPolicy {
        TrustPolicy {
            auto_publish,
            requires_moderation,
            rules_json: serde_json::json!({}),
        }
    }

    #[test]
    fn default_policy_matches_trust_level() {
        let trusted = default_policy(ModuleTrustLevel::Trusted);
        assert!(trusted.auto_publish && !trusted.requires_moderation);
        let untrusted = default_policy(ModuleTrustLevel::Untrusted);
        assert!(!untrusted.auto_publish && untrusted.requires_moderation);
    }

    #[test]
    fn trusted_publishes_above_threshold() {
        let decision = resolve_publish_decision(
            true,
            ModuleTrustLevel::Trusted,
            &policy(true, false),
            Some(0.9),
            &[],
        );
        assert!(decision.publish);
        assert_eq!(decision.reason, PublishReason::TrustedAutoPublish);
        assert_eq!(decision.candidate_state, CandidateState::Published);
        assert_eq!(decision.posting_status, PostingStatus::Active);
    }

    #[test]
    fn trusted_below_min_confidence_needs_review() {
        let decision = resolve_publish_decision(
            true,
            ModuleTrustLevel::Trusted,
            &policy(true, false),
            Some(0.5),
            &[],
        );
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::BelowMinConfidence);
        assert_eq!(decision.candidate_state, CandidateState::NeedsReview);
        assert_eq!(decision.posting_status, PostingStatus::Archived);
    }

    #[test]
    fn semi_trusted_conflict_flag_blocks_publish() {
        let decision = resolve_publish_decision(
            true,
            ModuleTrustLevel::SemiTrusted,
            &policy(true, false),
            Some(0.95),
            &["conflict_title_mismatch".to_string()],
        );
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::SemiTrustedConflictFlag);
    }

    #[test]
    fn untrusted_never_auto_publishes() {
        let decision = resolve_publish_decision(
            true,
            ModuleTrustLevel::Untrusted,
            &default_policy(ModuleTrustLevel::Untrusted),
            Some(0.99),
            &[],
        );
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::UntrustedRequiresModeration);
    }

    #[test]
    fn not_projectable_short_circuits_before_trust_level() {
        let decision = resolve_publish_decision(
            false,
            ModuleTrustLevel::Trusted,
            &policy(true, false),
            Some(0.99),
            &[],
        );
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::NotProjectable);
    }

    #[test]
    fn rules_json_min_confidence_override_is_honored() {
        let mut custom = policy(true, false);
        custom.rules_json = serde_json::json!({"min_confidence": 0.2});
        let decision = resolve_publish_decision(true, ModuleTrustLevel::Trusted, &custom, Some(0.3), &[]);
        assert!(decision.publish);

        let mut stricter = policy(true, false);
        stricter.rules_json = serde_json::json!({"min_confidence": 0.95});
        let decision = resolve_publish_decision(true, ModuleTrustLevel::Trusted, &stricter, Some(0.9), &[]);
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::BelowMinConfidence);
    }

    #[test]
    fn out_of_range_override_falls_back_to_base_threshold() {
        let mut invalid = policy(true, false);
        invalid.rules_json = serde_json::json!({"min_confidence": 1.5});
        let decision = resolve_publish_decision(true, ModuleTrustLevel::Trusted, &invalid, Some(0.5), &[]);
        assert!(!decision.publish);
        assert_eq!(decision.reason, PublishReason::BelowMinConfidence);
    }
}

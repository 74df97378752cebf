use serde::{Deserialize, Serialize};

/// One macro invocation per closed string enum: emits the type, `Display`,
/// `FromStr`, `sqlx::Type`/`Decode`/`Encode` (stored as TEXT), and serde as
/// the lowercase wire string. Keeps the enumerated sets of §3/§9 from
/// silently widening — every match on these types must be exhaustive.
macro_rules! closed_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub const ALL: &'static [$name] = &[$(Self::$variant),+];
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(format!(concat!(stringify!($name), ": unknown value {:?}"), other)),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                raw.parse().map_err(|e: String| e.into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

closed_enum!(CandidateState {
    Discovered => "discovered",
    Processed => "processed",
    Publishable => "publishable",
    NeedsReview => "needs_review",
    Published => "published",
    Rejected => "rejected",
    Archived => "archived",
    Closed => "closed",
});

closed_enum!(PostingStatus {
    Active => "active",
    Stale => "stale",
    Archived => "archived",
    Closed => "closed",
});

closed_enum!(JobKind {
    Extract => "extract",
    Dedupe => "dedupe",
    Enrich => "enrich",
    CheckFreshness => "check_freshness",
    ResolveUrlRedirects => "resolve_url_redirects",
});

closed_enum!(JobStatus {
    Queued => "queued",
    Claimed => "claimed",
    Done => "done",
    Failed => "failed",
    DeadLetter => "dead_letter",
});

closed_enum!(ModuleKind {
    Connector => "connector",
    Processor => "processor",
});

closed_enum!(ModuleTrustLevel {
    Trusted => "trusted",
    SemiTrusted => "semi_trusted",
    Untrusted => "untrusted",
});

closed_enum!(MergeDecision {
    None => "none",
    AutoMerged => "auto_merged",
    ManualMerged => "manual_merged",
    NeedsReview => "needs_review",
    Rejected => "rejected",
});

closed_enum!(EvidenceKind {
    Snapshot => "snapshot",
    Document => "document",
    Screenshot => "screenshot",
    ApiResponse => "api_response",
});

closed_enum!(ActorType {
    Human => "human",
    Machine => "machine",
    System => "system",
});

/// Polymorphism over principals (§9 design notes): a tagged variant with a
/// total scope check that works identically for both arms.
#[derive(Debug, Clone)]
pub enum Principal {
    Human {
        user_id: String,
        role: String,
        scopes: Vec<String>,
    },
    Machine {
        module_id: String,
        module_db_id: uuid::Uuid,
        scopes: Vec<String>,
    },
}

impl Principal {
    pub fn actor_type(&self) -> ActorType {
        match self {
            Self::Human { .. } => ActorType::Human,
            Self::Machine { .. } => ActorType::Machine,
        }
    }

    pub fn actor_id(&self) -> String {
        match self {
            Self::Human { user_id, .. } => user_id.clone(),
            Self::Machine { module_id, .. } => module_id.clone(),
        }
    }

    pub fn scopes(&self) -> &[String] {
        match self {
            Self::Human { scopes, .. } => scopes,
            Self::Machine { scopes, .. } => scopes,
        }
    }

    /// Total on both variants: every scope in `required` must be present.
    pub fn has_scopes(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|r| self.scopes().iter().any(|s| s == r))
    }
}

/// Role → scope table for human principals, fixed and never user-controlled
/// (role itself comes only from the identity provider's `app_metadata`).
pub fn role_scopes(role: &str) -> Vec<String> {
    let base = ["catalog:read", "submission:write"];
    let moderator = ["moderation:read", "moderation:write"];
    let admin = ["admin:write"];

    let mut scopes: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    if role == "moderator" || role == "admin" {
        scopes.extend(moderator.iter().map(|s| s.to_string()));
    }
    if role == "admin" {
        scopes.extend(admin.iter().map(|s| s.to_string()));
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn candidate_state_roundtrips() {
        for state in CandidateState::ALL {
            let s = state.to_string();
            assert_eq!(CandidateState::from_str(&s).unwrap(), *state);
        }
    }

    #[test]
    fn role_scopes_escalate_with_role() {
        assert_eq!(role_scopes("user"), vec!["catalog:read", "submission:write"]);
        assert!(role_scopes("moderator").contains(&"moderation:write".to_string()));
        assert!(role_scopes("admin").contains(&"admin:write".to_string()));
        assert!(!role_scopes("moderator").contains(&"admin:write".to_string()));
    }

    #[test]
    fn principal_has_scopes_is_total() {
        let human = Principal::Human {
            user_id: "u1".into(),
            role: "moderator".into(),
            scopes: role_scopes("moderator"),
        };
        assert!(human.has_scopes(&["moderation:read"]));
        assert!(!human.has_scopes(&["admin:write"]));

        let machine = Principal::Machine {
            module_id: "connector-1".into(),
            module_db_id: uuid::Uuid::nil(),
            scopes: vec!["discoveries:write".into()],
        };
        assert!(machine.has_scopes(&["discoveries:write"]));
        assert!(!machine.has_scopes(&["jobs:write"]));
    }
}

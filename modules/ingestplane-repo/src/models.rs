//! Row types for the tables in `migrations/0001_init.sql`. One struct per
//! entity in §3, deriving `sqlx::FromRow` directly against the TEXT-backed
//! enum columns via the `closed_enum!` `Decode`/`Encode` impls in
//! `ingestplane-common`.

use chrono::{DateTime, Utc};
use ingestplane_common::{
    CandidateState, EvidenceKind, JobKind, JobStatus, MergeDecision, ModuleKind, ModuleTrustLevel,
    PostingStatus,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ModuleRow {
    pub id: Uuid,
    pub module_id: String,
    pub name: String,
    pub kind: ModuleKind,
    pub enabled: bool,
    pub scopes: Value,
    pub trust_level: ModuleTrustLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleRow {
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ModuleCredentialRow {
    pub id: Uuid,
    pub module_id: Uuid,
    pub key_hash: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct DiscoveryRow {
    pub id: Uuid,
    pub origin_module_id: Uuid,
    pub external_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub url: Option<String>,
    pub normalized_url: Option<String>,
    pub canonical_hash: Option<String>,
    pub title_hint: Option<String>,
    pub text_hint: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EvidenceRow {
    pub id: Uuid,
    pub discovery_id: Option<Uuid>,
    pub kind: EvidenceKind,
    pub uri: String,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub content_type: Option<String>,
    pub byte_size: Option<i64>,
    pub metadata: Value,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct JobRow {
    pub id: Uuid,
    pub kind: JobKind,
    pub target_type: String,
    pub target_id: Option<Uuid>,
    pub inputs_json: Value,
    pub status: JobStatus,
    pub attempt: i32,
    pub locked_by_module_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub result_json: Option<Value>,
    pub error_json: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PostingCandidateRow {
    pub id: Uuid,
    pub state: CandidateState,
    pub dedupe_bucket_key: Option<String>,
    pub dedupe_confidence: Option<f64>,
    pub extracted_fields: Value,
    pub risk_flags: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostingCandidateRow {
    pub fn risk_flag_list(&self) -> Vec<String> {
        self.risk_flags
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PostingRow {
    pub id: Uuid,
    pub candidate_id: Option<Uuid>,
    pub title: String,
    pub canonical_url: String,
    pub normalized_url: String,
    pub canonical_hash: String,
    pub organization_name: String,
    pub sector: Option<String>,
    pub degree_level: Option<String>,
    pub opportunity_kind: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub remote: bool,
    pub tags: Value,
    pub areas: Value,
    pub description_text: Option<String>,
    pub application_url: Option<String>,
    pub deadline: Option<String>,
    pub source_refs: Value,
    pub status: PostingStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CandidateMergeDecisionRow {
    pub id: Uuid,
    pub primary_id: Uuid,
    pub secondary_id: Uuid,
    pub decision: MergeDecision,
    pub confidence: Option<f64>,
    pub decided_by: String,
    pub rationale: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SourceTrustPolicyRow {
    pub id: Uuid,
    pub source_key: String,
    pub trust_level: ModuleTrustLevel,
    pub auto_publish: bool,
    pub requires_moderation: bool,
    pub rules_json: Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UrlOverrideRow {
    pub host_suffix: String,
    pub strip_www: bool,
    pub force_https: bool,
    pub strip_query_params: Value,
    pub strip_query_prefixes: Value,
    pub enabled: bool,
}

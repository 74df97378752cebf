//! Read paths and admin CRUD backing §6's public/admin routes. Kept
//! separate from the write-heavy modules above since none of these touch
//! the provenance log or state machines — plain filtered SELECTs and
//! single-row upserts.

use ingestplane_common::{ModuleKind, ModuleTrustLevel, RepoError, RepoResult};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{
    CandidateMergeDecisionRow, ModuleRow, PostingCandidateRow, PostingRow, SourceTrustPolicyRow, UrlOverrideRow,
};

#[derive(Debug, Default)]
pub struct PostingFilter {
    pub q: Option<String>,
    pub organization_name: Option<String>,
    pub country: Option<String>,
    pub remote: Option<bool>,
    pub status: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
    pub descending: bool,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_postings(pool: &PgPool, filter: &PostingFilter) -> RepoResult<Vec<PostingRow>> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM postings WHERE 1 = 1");

    if let Some(q) = &filter.q {
        qb.push(" AND (title ILIKE ").push_bind(format!("%{q}%")).push(" OR description_text ILIKE ").push_bind(format!("%{q}%")).push(")");
    }
    if let Some(org) = &filter.organization_name {
        qb.push(" AND organization_name ILIKE ").push_bind(format!("%{org}%"));
    }
    if let Some(country) = &filter.country {
        qb.push(" AND country = ").push_bind(country);
    }
    if let Some(remote) = filter.remote {
        qb.push(" AND remote = ").push_bind(remote);
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(tag) = &filter.tag {
        qb.push(" AND tags @> ").push_bind(serde_json::json!([tag]));
    }

    let sort_col = match filter.sort.as_deref() {
        Some("updated_at") => "updated_at",
        Some("deadline") => "deadline",
        Some("published_at") => "published_at",
        _ => "created_at",
    };
    qb.push(format!(" ORDER BY {sort_col} {}", if filter.descending { "DESC" } else { "ASC" }));
    qb.push(" LIMIT ").push_bind(filter.limit);
    qb.push(" OFFSET ").push_bind(filter.offset);

    let rows = qb.build_query_as::<PostingRow>().fetch_all(pool).await.map_err(RepoError::from)?;
    Ok(rows)
}

pub async fn get_posting(pool: &PgPool, posting_id: Uuid) -> RepoResult<PostingRow> {
    sqlx::query_as::<_, PostingRow>("SELECT * FROM postings WHERE id = $1")
        .bind(posting_id)
        .fetch_optional(pool)
        .await
        .map_err(RepoError::from)?
        .ok_or_else(|| RepoError::not_found(format!("posting {posting_id} not found")))
}

#[derive(Debug, Default)]
pub struct CandidateFilter {
    pub state: Option<String>,
    pub min_confidence: Option<f64>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_candidates(pool: &PgPool, filter: &CandidateFilter) -> RepoResult<Vec<PostingCandidateRow>> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM posting_candidates WHERE 1 = 1");
    if let Some(state) = &filter.state {
        qb.push(" AND state = ").push_bind(state);
    }
    if let Some(min_confidence) = filter.min_confidence {
        qb.push(" AND dedupe_confidence >= ").push_bind(min_confidence);
    }
    qb.push(" ORDER BY updated_at DESC LIMIT ").push_bind(filter.limit);
    qb.push(" OFFSET ").push_bind(filter.offset);
    let rows = qb.build_query_as::<PostingCandidateRow>().fetch_all(pool).await.map_err(RepoError::from)?;
    Ok(rows)
}

pub async fn get_candidate(pool: &PgPool, candidate_id: Uuid) -> RepoResult<PostingCandidateRow> {
    sqlx::query_as::<_, PostingCandidateRow>("SELECT * FROM posting_candidates WHERE id = $1")
        .bind(candidate_id)
        .fetch_optional(pool)
        .await
        .map_err(RepoError::from)?
        .ok_or_else(|| RepoError::not_found(format!("candidate {candidate_id} not found")))
}

/// Candidate-state facet counts, backing the moderation queue's summary view.
pub async fn candidate_state_facets(pool: &PgPool) -> RepoResult<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT state, count(*) FROM posting_candidates GROUP BY state")
        .fetch_all(pool)
        .await
        .map_err(RepoError::from)?;
    Ok(rows)
}

pub async fn list_candidate_events(pool: &PgPool, candidate_id: Uuid) -> RepoResult<Vec<ingestplane_events::ProvenanceEvent>> {
    ingestplane_events::ProvenanceLog::new(pool.clone())
        .read_by_entity("posting_candidate", candidate_id)
        .await
        .map_err(RepoError::from)
}

pub async fn list_candidate_merge_decisions(pool: &PgPool, candidate_id: Uuid) -> RepoResult<Vec<CandidateMergeDecisionRow>> {
    let rows = sqlx::query_as::<_, CandidateMergeDecisionRow>(
        "SELECT * FROM candidate_merge_decisions WHERE primary_id = $1 OR secondary_id = $1 ORDER BY created_at DESC",
    )
    .bind(candidate_id)
    .fetch_all(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(rows)
}

pub async fn list_modules(pool: &PgPool) -> RepoResult<Vec<ModuleRow>> {
    let rows = sqlx::query_as::<_, ModuleRow>("SELECT * FROM modules ORDER BY module_id")
        .fetch_all(pool)
        .await
        .map_err(RepoError::from)?;
    Ok(rows)
}

pub struct CreateModuleInput {
    pub module_id: String,
    pub name: String,
    pub kind: ModuleKind,
    pub trust_level: ModuleTrustLevel,
    pub scopes: Vec<String>,
}

pub async fn create_module(pool: &PgPool, input: CreateModuleInput) -> RepoResult<ModuleRow> {
    let row = sqlx::query_as::<_, ModuleRow>(
        r#"
        INSERT INTO modules (module_id, name, kind, trust_level, scopes)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&input.module_id)
    .bind(&input.name)
    .bind(input.kind)
    .bind(input.trust_level)
    .bind(serde_json::to_value(&input.scopes).unwrap_or(Value::Array(vec![])))
    .fetch_one(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(row)
}

/// Stores `sha256(api_key)` hex-encoded, never the raw key (§6 auth
/// grounding: mirrors `module_credentials.key_hash` comparison in
/// `ingestplane-api::auth`).
pub async fn rotate_module_credential(pool: &PgPool, module_db_id: Uuid, api_key: &str) -> RepoResult<Uuid> {
    use sha2::{Digest, Sha256};
    let key_hash = hex::encode(Sha256::digest(api_key.as_bytes()));

    sqlx::query("UPDATE module_credentials SET enabled = false WHERE module_id = $1")
        .bind(module_db_id)
        .execute(pool)
        .await
        .map_err(RepoError::from)?;

    let credential_id: Uuid = sqlx::query_scalar(
        "INSERT INTO module_credentials (module_id, key_hash, enabled) VALUES ($1, $2, true) RETURNING id",
    )
    .bind(module_db_id)
    .bind(&key_hash)
    .fetch_one(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(credential_id)
}

pub async fn list_source_trust_policies(pool: &PgPool) -> RepoResult<Vec<SourceTrustPolicyRow>> {
    let rows = sqlx::query_as::<_, SourceTrustPolicyRow>("SELECT * FROM source_trust_policy ORDER BY source_key")
        .fetch_all(pool)
        .await
        .map_err(RepoError::from)?;
    Ok(rows)
}

pub struct UpsertTrustPolicyInput {
    pub source_key: String,
    pub trust_level: ModuleTrustLevel,
    pub auto_publish: bool,
    pub requires_moderation: bool,
    pub rules_json: Value,
    pub enabled: bool,
}

pub async fn upsert_source_trust_policy(pool: &PgPool, input: UpsertTrustPolicyInput) -> RepoResult<SourceTrustPolicyRow> {
    let row = sqlx::query_as::<_, SourceTrustPolicyRow>(
        r#"
        INSERT INTO source_trust_policy (source_key, trust_level, auto_publish, requires_moderation, rules_json, enabled)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO UPDATE SET
            trust_level = EXCLUDED.trust_level,
            auto_publish = EXCLUDED.auto_publish,
            requires_moderation = EXCLUDED.requires_moderation,
            rules_json = EXCLUDED.rules_json,
            enabled = EXCLUDED.enabled
        RETURNING *
        "#,
    )
    .bind(&input.source_key)
    .bind(input.trust_level)
    .bind(input.auto_publish)
    .bind(input.requires_moderation)
    .bind(&input.rules_json)
    .bind(input.enabled)
    .fetch_one(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(row)
}

pub async fn list_url_overrides(pool: &PgPool) -> RepoResult<Vec<UrlOverrideRow>> {
    let rows = sqlx::query_as::<_, UrlOverrideRow>("SELECT * FROM url_normalization_overrides ORDER BY host_suffix")
        .fetch_all(pool)
        .await
        .map_err(RepoError::from)?;
    Ok(rows)
}

pub struct UpsertUrlOverrideInput {
    pub host_suffix: String,
    pub strip_www: bool,
    pub force_https: bool,
    pub strip_query_params: Vec<String>,
    pub strip_query_prefixes: Vec<String>,
    pub enabled: bool,
}

pub async fn upsert_url_override(pool: &PgPool, input: UpsertUrlOverrideInput) -> RepoResult<UrlOverrideRow> {
    let row = sqlx::query_as::<_, UrlOverrideRow>(
        r#"
        INSERT INTO url_normalization_overrides
            (host_suffix, strip_www, force_https, strip_query_params, strip_query_prefixes, enabled)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (host_suffix) DO UPDATE SET
            strip_www = EXCLUDED.strip_www,
            force_https = EXCLUDED.force_https,
            strip_query_params = EXCLUDED.strip_query_params,
            strip_query_prefixes = EXCLUDED.strip_query_prefixes,
            enabled = EXCLUDED.enabled
        RETURNING *
        "#,
    )
    .bind(&input.host_suffix)
    .bind(input.strip_www)
    .bind(input.force_https)
    .bind(serde_json::to_value(&input.strip_query_params).unwrap_or(Value::Array(vec![])))
    .bind(serde_json::to_value(&input.strip_query_prefixes).unwrap_or(Value::Array(vec![])))
    .bind(input.enabled)
    .fetch_one(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(row)
}

pub async fn find_module_by_module_id(pool: &PgPool, module_id: &str) -> RepoResult<Option<ModuleRow>> {
    let row = sqlx::query_as::<_, ModuleRow>("SELECT * FROM modules WHERE module_id = $1 AND enabled")
        .bind(module_id)
        .fetch_optional(pool)
        .await
        .map_err(RepoError::from)?;
    Ok(row)
}

pub async fn find_enabled_credential_hashes(pool: &PgPool, module_db_id: Uuid) -> RepoResult<Vec<String>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT key_hash FROM module_credentials WHERE module_id = $1 AND enabled",
    )
    .bind(module_db_id)
    .fetch_all(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(rows)
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use ingestplane_common::{ModuleKind, ModuleTrustLevel};
use ingestplane_repo::models::{ModuleRow, SourceTrustPolicyRow, UrlOverrideRow};
use ingestplane_repo::queries::{self, CreateModuleInput, UpsertTrustPolicyInput, UpsertUrlOverrideInput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_scopes, HumanPrincipal};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
) -> ApiResult<Json<Vec<ModuleRow>>> {
    require_scopes(&principal, &["admin:write"])?;
    let modules = queries::list_modules(state.repo.pool()).await?;
    Ok(Json(modules))
}

#[derive(Debug, Deserialize)]
pub struct CreateModuleRequest {
    pub module_id: String,
    pub name: String,
    pub kind: ModuleKind,
    pub trust_level: ModuleTrustLevel,
    pub scopes: Vec<String>,
}

pub async fn create_module(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Json(body): Json<CreateModuleRequest>,
) -> ApiResult<Json<ModuleRow>> {
    require_scopes(&principal, &["admin:write"])?;
    let module = queries::create_module(
        state.repo.pool(),
        CreateModuleInput {
            module_id: body.module_id,
            name: body.name,
            kind: body.kind,
            trust_level: body.trust_level,
            scopes: body.scopes,
        },
    )
    .await?;
    Ok(Json(module))
}

#[derive(Debug, Deserialize)]
pub struct RotateCredentialRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct RotateCredentialResponse {
    pub credential_id: Uuid,
}

pub async fn rotate_module_credential(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    axum::extract::Path(module_db_id): axum::extract::Path<Uuid>,
    Json(body): Json<RotateCredentialRequest>,
) -> ApiResult<Json<RotateCredentialResponse>> {
    require_scopes(&principal, &["admin:write"])?;
    let credential_id = queries::rotate_module_credential(state.repo.pool(), module_db_id, &body.api_key).await?;
    Ok(Json(RotateCredentialResponse { credential_id }))
}

pub async fn list_source_trust_policies(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
) -> ApiResult<Json<Vec<SourceTrustPolicyRow>>> {
    require_scopes(&principal, &["admin:write"])?;
    let policies = queries::list_source_trust_policies(state.repo.pool()).await?;
    Ok(Json(policies))
}

#[derive(Debug, Deserialize)]
pub struct UpsertTrustPolicyRequest {
    pub source_key: String,
    pub trust_level: ModuleTrustLevel,
    pub auto_publish: bool,
    pub requires_moderation: bool,
    #[serde(default)]
    pub rules_json: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn upsert_source_trust_policy(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Json(body): Json<UpsertTrustPolicyRequest>,
) -> ApiResult<Json<SourceTrustPolicyRow>> {
    require_scopes(&principal, &["admin:write"])?;
    let policy = queries::upsert_source_trust_policy(
        state.repo.pool(),
        UpsertTrustPolicyInput {
            source_key: body.source_key,
            trust_level: body.trust_level,
            auto_publish: body.auto_publish,
            requires_moderation: body.requires_moderation,
            rules_json: body.rules_json,
            enabled: body.enabled,
        },
    )
    .await?;
    Ok(Json(policy))
}

pub async fn list_url_overrides(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
) -> ApiResult<Json<Vec<UrlOverrideRow>>> {
    require_scopes(&principal, &["admin:write"])?;
    let overrides = queries::list_url_overrides(state.repo.pool()).await?;
    Ok(Json(overrides))
}

#[derive(Debug, Deserialize)]
pub struct UpsertUrlOverrideRequest {
    pub host_suffix: String,
    #[serde(default)]
    pub strip_www: bool,
    #[serde(default)]
    pub force_https: bool,
    #[serde(default)]
    pub strip_query_params: Vec<String>,
    #[serde(default)]
    pub strip_query_prefixes: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub async fn upsert_url_override(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Json(body): Json<UpsertUrlOverrideRequest>,
) -> ApiResult<Json<UrlOverrideRow>> {
    require_scopes(&principal, &["admin:write"])?;
    let row = queries::upsert_url_override(
        state.repo.pool(),
        UpsertUrlOverrideInput {
            host_suffix: body.host_suffix,
            strip_www: body.strip_www,
            force_https: body.force_https,
            strip_query_params: body.strip_query_params,
            strip_query_prefixes: body.strip_query_prefixes,
            enabled: body.enabled,
        },
    )
    .await?;
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RequeuedResponse {
    pub requeued: i64,
}

/// Admin-scoped mirror of the machine-facing reaper route (§6 lists both a
/// machine path under `/jobs` and an admin path here for operator-triggered
/// maintenance).
pub async fn reap_expired(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<RequeuedResponse>> {
    require_scopes(&principal, &["admin:write"])?;
    let requeued = state.repo.reap_expired_jobs(query.limit.unwrap_or(100).clamp(1, 1000)).await?;
    Ok(Json(RequeuedResponse { requeued }))
}

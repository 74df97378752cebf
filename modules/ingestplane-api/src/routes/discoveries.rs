use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use ingestplane_common::Principal;
use ingestplane_repo::discoveries::CreateDiscoveryInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{require_scopes, MachinePrincipal};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDiscoveryRequest {
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title_hint: Option<String>,
    pub text_hint: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub resolve_redirects: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CreateDiscoveryResponse {
    pub discovery_id: uuid::Uuid,
    pub normalized_url: Option<String>,
    pub canonical_hash: Option<String>,
}

pub async fn create_discovery(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Json(body): Json<CreateDiscoveryRequest>,
) -> ApiResult<(StatusCode, Json<CreateDiscoveryResponse>)> {
    require_scopes(&principal, &["discoveries:write"])?;
    let Principal::Machine { module_db_id, .. } = principal else { unreachable!() };

    let created = state
        .repo
        .create_discovery_and_enqueue_extract(
            CreateDiscoveryInput {
                origin_module_id: module_db_id,
                external_id: body.external_id,
                url: body.url,
                title_hint: body.title_hint,
                text_hint: body.text_hint,
                metadata: body.metadata,
                resolve_redirects: body.resolve_redirects,
            },
            true,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDiscoveryResponse {
            discovery_id: created.discovery_id,
            normalized_url: created.normalized_url,
            canonical_hash: created.canonical_hash,
        }),
    ))
}

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use ingestplane_common::EvidenceKind;
use ingestplane_repo::evidence::RecordEvidenceInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{require_scopes, MachinePrincipal};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecordEvidenceRequest {
    pub discovery_id: Option<uuid::Uuid>,
    pub kind: EvidenceKind,
    pub uri: String,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub byte_size: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct RecordEvidenceResponse {
    pub evidence_id: uuid::Uuid,
}

pub async fn record_evidence(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Json(body): Json<RecordEvidenceRequest>,
) -> ApiResult<(StatusCode, Json<RecordEvidenceResponse>)> {
    require_scopes(&principal, &["evidence:write"])?;

    let evidence_id = state
        .repo
        .record_evidence(
            &principal.actor_id(),
            RecordEvidenceInput {
                discovery_id: body.discovery_id,
                kind: body.kind,
                uri: body.uri,
                content_hash: body.content_hash,
                content_type: body.content_type,
                byte_size: body.byte_size,
                metadata: body.metadata,
            },
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(RecordEvidenceResponse { evidence_id })))
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ingestplane_common::{CandidateState, PostingStatus};
use ingestplane_events::ProvenanceEvent;
use ingestplane_repo::models::{CandidateMergeDecisionRow, PostingCandidateRow};
use ingestplane_repo::queries::{self, CandidateFilter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{require_scopes, HumanPrincipal};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListCandidatesQuery {
    pub state: Option<String>,
    pub min_confidence: Option<f64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Query(query): Query<ListCandidatesQuery>,
) -> ApiResult<Json<Vec<PostingCandidateRow>>> {
    require_scopes(&principal, &["moderation:read"])?;
    let filter = CandidateFilter {
        state: query.state,
        min_confidence: query.min_confidence,
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let candidates = queries::list_candidates(state.repo.pool(), &filter).await?;
    Ok(Json(candidates))
}

#[derive(Debug, Serialize)]
pub struct CandidateFacetsResponse {
    pub facets: Vec<(String, i64)>,
}

pub async fn candidate_facets(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
) -> ApiResult<Json<CandidateFacetsResponse>> {
    require_scopes(&principal, &["moderation:read"])?;
    let facets = queries::candidate_state_facets(state.repo.pool()).await?;
    Ok(Json(CandidateFacetsResponse { facets }))
}

pub async fn get_candidate(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(candidate_id): Path<Uuid>,
) -> ApiResult<Json<PostingCandidateRow>> {
    require_scopes(&principal, &["moderation:read"])?;
    let candidate = queries::get_candidate(state.repo.pool(), candidate_id).await?;
    Ok(Json(candidate))
}

pub async fn candidate_events(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(candidate_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ProvenanceEvent>>> {
    require_scopes(&principal, &["moderation:read"])?;
    let events = queries::list_candidate_events(state.repo.pool(), candidate_id).await?;
    Ok(Json(events))
}

pub async fn candidate_merge_decisions(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(candidate_id): Path<Uuid>,
) -> ApiResult<Json<Vec<CandidateMergeDecisionRow>>> {
    require_scopes(&principal, &["moderation:read"])?;
    let decisions = queries::list_candidate_merge_decisions(state.repo.pool(), candidate_id).await?;
    Ok(Json(decisions))
}

#[derive(Debug, Deserialize)]
pub struct PatchCandidateRequest {
    pub state: CandidateState,
    pub reason: Option<String>,
}

pub async fn patch_candidate(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(candidate_id): Path<Uuid>,
    Json(body): Json<PatchCandidateRequest>,
) -> ApiResult<Json<PostingCandidateRow>> {
    require_scopes(&principal, &["moderation:write"])?;
    state
        .repo
        .update_candidate_state(candidate_id, body.state, &principal.actor_id(), body.reason.as_deref())
        .await?;
    let candidate = queries::get_candidate(state.repo.pool(), candidate_id).await?;
    Ok(Json(candidate))
}

#[derive(Debug, Deserialize)]
pub struct OverrideCandidateRequest {
    pub state: CandidateState,
    pub posting_status: Option<PostingStatus>,
    pub reason: Option<String>,
}

pub async fn override_candidate(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(candidate_id): Path<Uuid>,
    Json(body): Json<OverrideCandidateRequest>,
) -> ApiResult<Json<PostingCandidateRow>> {
    require_scopes(&principal, &["moderation:write"])?;
    state
        .repo
        .override_candidate_state(candidate_id, body.state, body.posting_status, &principal.actor_id(), body.reason.as_deref())
        .await?;
    let candidate = queries::get_candidate(state.repo.pool(), candidate_id).await?;
    Ok(Json(candidate))
}

#[derive(Debug, Deserialize)]
pub struct MergeCandidatesRequest {
    pub secondary_id: Uuid,
    pub reason: Option<String>,
}

pub async fn merge_candidates(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(primary_id): Path<Uuid>,
    Json(body): Json<MergeCandidatesRequest>,
) -> ApiResult<Json<PostingCandidateRow>> {
    require_scopes(&principal, &["moderation:write"])?;
    state
        .repo
        .merge_candidates(primary_id, body.secondary_id, &principal.actor_id(), body.reason.as_deref())
        .await?;
    let candidate = queries::get_candidate(state.repo.pool(), primary_id).await?;
    Ok(Json(candidate))
}

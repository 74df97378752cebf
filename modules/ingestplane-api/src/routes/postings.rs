use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ingestplane_common::PostingStatus;
use ingestplane_repo::models::PostingRow;
use ingestplane_repo::queries::{self, PostingFilter};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{require_scopes, HumanPrincipal};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListPostingsQuery {
    pub q: Option<String>,
    pub organization_name: Option<String>,
    pub country: Option<String>,
    pub remote: Option<bool>,
    pub status: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_postings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPostingsQuery>,
) -> ApiResult<Json<Vec<PostingRow>>> {
    let filter = PostingFilter {
        q: query.q,
        organization_name: query.organization_name,
        country: query.country,
        remote: query.remote,
        status: query.status,
        tag: query.tag,
        sort: query.sort,
        descending: query.order.as_deref() != Some("asc"),
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let postings = queries::list_postings(state.repo.pool(), &filter).await?;
    Ok(Json(postings))
}

pub async fn get_posting(State(state): State<Arc<AppState>>, Path(posting_id): Path<Uuid>) -> ApiResult<Json<PostingRow>> {
    let posting = queries::get_posting(state.repo.pool(), posting_id).await?;
    Ok(Json(posting))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostingStatusRequest {
    pub status: PostingStatus,
    pub reason: Option<String>,
}

pub async fn update_posting_status(
    State(state): State<Arc<AppState>>,
    HumanPrincipal(principal): HumanPrincipal,
    Path(posting_id): Path<Uuid>,
    Json(body): Json<UpdatePostingStatusRequest>,
) -> ApiResult<Json<PostingRow>> {
    require_scopes(&principal, &["moderation:write"])?;
    state
        .repo
        .update_posting_status(posting_id, body.status, &principal.actor_id(), body.reason.as_deref())
        .await?;
    let posting = queries::get_posting(state.repo.pool(), posting_id).await?;
    Ok(Json(posting))
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ingestplane_common::{JobStatus, Principal};
use ingestplane_repo::jobs::{FreshnessThresholds, RetryPolicy, SubmitResultInput};
use ingestplane_repo::models::JobRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_scopes, AnyPrincipal, MachinePrincipal};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobRow>>> {
    require_scopes(&principal, &["jobs:read"])?;
    let jobs = state.repo.list_queued_jobs(query.limit.unwrap_or(50).clamp(1, 500)).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
pub struct ClaimJobRequest {
    pub lease_seconds: Option<i64>,
}

pub async fn claim_job(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Path(job_id): Path<Uuid>,
    Json(body): Json<ClaimJobRequest>,
) -> ApiResult<Json<JobRow>> {
    require_scopes(&principal, &["jobs:write"])?;
    let Principal::Machine { module_db_id, .. } = principal else { unreachable!() };

    let job = state
        .repo
        .claim_job(job_id, module_db_id, body.lease_seconds.unwrap_or(state.config.default_lease_seconds))
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobResultRequest {
    pub status: JobStatus,
    pub result_json: Option<Value>,
    pub error_json: Option<Value>,
}

pub async fn submit_job_result(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Path(job_id): Path<Uuid>,
    Json(body): Json<SubmitJobResultRequest>,
) -> ApiResult<Json<JobRow>> {
    require_scopes(&principal, &["jobs:write"])?;
    let Principal::Machine { module_db_id, .. } = principal else { unreachable!() };

    if !matches!(body.status, JobStatus::Done | JobStatus::Failed | JobStatus::DeadLetter) {
        return Err(ApiError::from(ingestplane_common::RepoError::validation(
            "status must be one of done, failed, dead_letter",
        )));
    }

    let policy = RetryPolicy {
        job_max_attempts: state.config.job_max_attempts,
        retry_base_seconds: state.config.job_retry_base_seconds,
        retry_max_seconds: state.config.job_retry_max_seconds,
    };

    let job = state
        .repo
        .submit_job_result(
            SubmitResultInput {
                job_id,
                module_id: module_db_id,
                requested: body.status,
                result_json: body.result_json,
                error_json: body.error_json,
            },
            &policy,
        )
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RequeuedResponse {
    pub requeued: i64,
}

pub async fn reap_expired(
    State(state): State<Arc<AppState>>,
    MachinePrincipal(principal): MachinePrincipal,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<RequeuedResponse>> {
    require_scopes(&principal, &["jobs:write"])?;
    let requeued = state.repo.reap_expired_jobs(query.limit.unwrap_or(100).clamp(1, 1000)).await?;
    Ok(Json(RequeuedResponse { requeued }))
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub enqueued: i64,
}

pub async fn enqueue_freshness(
    State(state): State<Arc<AppState>>,
    AnyPrincipal(principal): AnyPrincipal,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<EnqueuedResponse>> {
    match &principal {
        Principal::Machine { .. } => require_scopes(&principal, &["jobs:write"])?,
        Principal::Human { .. } => require_scopes(&principal, &["admin:write"])?,
    }
    let thresholds = FreshnessThresholds {
        freshness_check_interval_hours: state.config.freshness_check_interval_hours,
        stale_after_hours: state.config.freshness_stale_after_hours,
        archive_after_hours: state.config.freshness_archive_after_hours,
    };
    let enqueued = state.repo.enqueue_due_freshness(query.limit.unwrap_or(100).clamp(1, 1000), &thresholds).await?;
    Ok(Json(EnqueuedResponse { enqueued }))
}

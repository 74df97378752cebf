//! Transactional `sqlx`-backed repository layer (§4.5-§4.9, §5). Each
//! public module here owns one or more operations from the spec and is
//! responsible for calling into `ingestplane-domain` for decision logic and
//! `ingestplane_events::append_in` for same-transaction provenance writes.

pub mod discoveries;
pub mod evidence;
pub mod jobs;
pub mod merge;
pub mod models;
pub mod moderation;
pub mod projection;
pub mod queries;
pub mod trust_policy;
pub mod url_overrides;

use sqlx::PgPool;

/// Thin handle around the pool, passed to every public operation in this
/// crate. Exists so callers in `ingestplane-api` hold one `Repo` rather than
/// a bare `PgPool` and a scattering of free-function imports.
#[derive(Clone)]
pub struct Repo {
    pool: PgPool,
}

impl Repo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_discovery_and_enqueue_extract(
        &self,
        input: discoveries::CreateDiscoveryInput,
        default_resolve_redirects: bool,
    ) -> ingestplane_common::RepoResult<discoveries::CreatedDiscovery> {
        discoveries::create_discovery_and_enqueue_extract(&self.pool, input, default_resolve_redirects).await
    }

    pub async fn record_evidence(
        &self,
        actor_id: &str,
        input: evidence::RecordEvidenceInput,
    ) -> ingestplane_common::RepoResult<uuid::Uuid> {
        evidence::record_evidence(&self.pool, actor_id, input).await
    }

    pub async fn list_queued_jobs(&self, limit: i64) -> ingestplane_common::RepoResult<Vec<models::JobRow>> {
        jobs::list_queued(&self.pool, limit).await
    }

    pub async fn claim_job(
        &self,
        job_id: uuid::Uuid,
        module_id: uuid::Uuid,
        lease_seconds: i64,
    ) -> ingestplane_common::RepoResult<models::JobRow> {
        jobs::claim(&self.pool, job_id, module_id, lease_seconds).await
    }

    pub async fn submit_job_result(
        &self,
        input: jobs::SubmitResultInput,
        policy: &jobs::RetryPolicy,
    ) -> ingestplane_common::RepoResult<models::JobRow> {
        jobs::submit_result(&self.pool, input, policy).await
    }

    pub async fn reap_expired_jobs(&self, limit: i64) -> ingestplane_common::RepoResult<i64> {
        jobs::reap_expired(&self.pool, limit).await
    }

    pub async fn enqueue_due_freshness(
        &self,
        limit: i64,
        thresholds: &jobs::FreshnessThresholds,
    ) -> ingestplane_common::RepoResult<i64> {
        jobs::enqueue_due_freshness(&self.pool, limit, thresholds).await
    }

    pub async fn update_candidate_state(
        &self,
        candidate_id: uuid::Uuid,
        to_state: ingestplane_common::CandidateState,
        actor_user_id: &str,
        reason: Option<&str>,
    ) -> ingestplane_common::RepoResult<()> {
        moderation::update_candidate_state(&self.pool, candidate_id, to_state, actor_user_id, reason).await
    }

    pub async fn override_candidate_state(
        &self,
        candidate_id: uuid::Uuid,
        to_state: ingestplane_common::CandidateState,
        posting_status: Option<ingestplane_common::PostingStatus>,
        actor_user_id: &str,
        reason: Option<&str>,
    ) -> ingestplane_common::RepoResult<()> {
        moderation::override_candidate_state(&self.pool, candidate_id, to_state, posting_status, actor_user_id, reason)
            .await
    }

    pub async fn merge_candidates(
        &self,
        primary_id: uuid::Uuid,
        secondary_id: uuid::Uuid,
        actor_user_id: &str,
        reason: Option<&str>,
    ) -> ingestplane_common::RepoResult<()> {
        moderation::merge_candidates(&self.pool, primary_id, secondary_id, actor_user_id, reason).await
    }

    pub async fn update_posting_status(
        &self,
        posting_id: uuid::Uuid,
        to_status: ingestplane_common::PostingStatus,
        actor_user_id: &str,
        reason: Option<&str>,
    ) -> ingestplane_common::RepoResult<()> {
        moderation::update_posting_status(&self.pool, posting_id, to_status, actor_user_id, reason).await
    }
}

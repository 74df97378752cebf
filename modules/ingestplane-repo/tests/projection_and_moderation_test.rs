mod harness;

use harness::TestContext;
use ingestplane_common::{CandidateState, JobKind, JobStatus, ModuleTrustLevel, PostingStatus};
use ingestplane_repo::discoveries::CreateDiscoveryInput;
use ingestplane_repo::jobs;
use ingestplane_repo::queries;
use serde_json::json;

async fn seed_extractable_discovery(ctx: &TestContext, module_id: uuid::Uuid, url: &str) -> uuid::Uuid {
    let created = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(
        &ctx.pool,
        CreateDiscoveryInput {
            origin_module_id: module_id,
            external_id: None,
            url: Some(url.to_string()),
            title_hint: None,
            text_hint: None,
            metadata: json!({}),
            resolve_redirects: Some(false),
        },
        true,
    )
    .await
    .expect("create discovery");
    created.discovery_id
}

fn extract_payload(url: &str) -> serde_json::Value {
    json!({
        "posting": {
            "title": "Visiting Research Fellow",
            "organization_name": "Acme Institute",
            "canonical_url": url,
            "normalized_url": url,
            "canonical_hash": format!("hash:{url}"),
            "country": "US",
            "tags": ["fellowship"],
        },
        "dedupe_confidence": 0.95,
        "risk_flags": [],
    })
}

#[tokio::test]
async fn trusted_auto_publish_source_projects_a_published_posting() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-trusted", ModuleTrustLevel::Trusted).await;
    ctx.seed_trust_policy(&format!("module:{module_id}"), true, false).await;

    let discovery_id = seed_extractable_discovery(&ctx, module_id, "https://example.org/fellowship/1").await;

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == JobKind::Extract).unwrap();
    let claimed = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await.expect("claim");

    let result = jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: claimed.id,
            module_id,
            requested: JobStatus::Done,
            result_json: Some(extract_payload("https://example.org/fellowship/1")),
            error_json: None,
        },
        &jobs::RetryPolicy { job_max_attempts: 5, retry_base_seconds: 30, retry_max_seconds: 3600 },
    )
    .await
    .expect("submit result");
    assert_eq!(result.status, JobStatus::Done);

    let candidates = queries::list_candidates(&ctx.pool, &queries::CandidateFilter::default())
        .await
        .expect("list candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].state, CandidateState::Published);

    let postings = queries::list_postings(&ctx.pool, &queries::PostingFilter { limit: 10, ..Default::default() })
        .await
        .expect("list postings");
    assert_eq!(postings.len(), 1);
    assert_eq!(postings[0].status, PostingStatus::Active);
    assert!(postings[0].published_at.is_some());

    let _ = discovery_id;
}

#[tokio::test]
async fn untrusted_source_without_projection_signal_lands_in_processed() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-untrusted", ModuleTrustLevel::Untrusted).await;

    let _discovery_id = seed_extractable_discovery(&ctx, module_id, "https://example.org/unknown/1").await;

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == JobKind::Extract).unwrap();
    let claimed = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await.expect("claim");

    jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: claimed.id,
            module_id,
            requested: JobStatus::Done,
            result_json: Some(json!({})),
            error_json: None,
        },
        &jobs::RetryPolicy { job_max_attempts: 5, retry_base_seconds: 30, retry_max_seconds: 3600 },
    )
    .await
    .expect("submit result");

    let candidates = queries::list_candidates(&ctx.pool, &queries::CandidateFilter::default())
        .await
        .expect("list candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].state, CandidateState::Processed);

    let postings = queries::list_postings(&ctx.pool, &queries::PostingFilter { limit: 10, ..Default::default() })
        .await
        .expect("list postings");
    assert!(postings.is_empty(), "no posting should be projected without a projection signal");
}

#[tokio::test]
async fn moderator_reject_then_archive_follows_state_machine() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-review", ModuleTrustLevel::SemiTrusted).await;
    ctx.seed_trust_policy(&format!("module:{module_id}"), false, true).await;

    seed_extractable_discovery(&ctx, module_id, "https://example.org/needs-review/1").await;

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == JobKind::Extract).unwrap();
    let claimed = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await.expect("claim");

    jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: claimed.id,
            module_id,
            requested: JobStatus::Done,
            result_json: Some(extract_payload("https://example.org/needs-review/1")),
            error_json: None,
        },
        &jobs::RetryPolicy { job_max_attempts: 5, retry_base_seconds: 30, retry_max_seconds: 3600 },
    )
    .await
    .expect("submit result");

    let candidates = queries::list_candidates(&ctx.pool, &queries::CandidateFilter::default())
        .await
        .expect("list candidates");
    assert_eq!(candidates.len(), 1);
    let candidate_id = candidates[0].id;
    assert_eq!(candidates[0].state, CandidateState::NeedsReview, "requires_moderation policy withholds auto-publish");

    ingestplane_repo::moderation::update_candidate_state(
        &ctx.pool,
        candidate_id,
        CandidateState::Rejected,
        "moderator-1",
        Some("duplicate listing"),
    )
    .await
    .expect("reject candidate");

    let rejected = queries::get_candidate(&ctx.pool, candidate_id).await.expect("get candidate");
    assert_eq!(rejected.state, CandidateState::Rejected);

    let invalid = ingestplane_repo::moderation::update_candidate_state(
        &ctx.pool,
        candidate_id,
        CandidateState::Published,
        "moderator-1",
        None,
    )
    .await;
    assert!(invalid.is_err(), "rejected candidates must not transition directly to published");

    ingestplane_repo::moderation::override_candidate_state(
        &ctx.pool,
        candidate_id,
        CandidateState::Archived,
        None,
        "moderator-1",
        Some("operator override after re-review"),
    )
    .await
    .expect("override is the escape hatch around the transition table");

    let archived = queries::get_candidate(&ctx.pool, candidate_id).await.expect("get candidate");
    assert_eq!(archived.state, CandidateState::Archived);

    let events = queries::list_candidate_events(&ctx.pool, candidate_id).await.expect("list events");
    assert!(events.iter().any(|e| e.event_type == "state_overridden"));
}

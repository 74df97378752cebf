mod harness;

use harness::TestContext;
use ingestplane_common::{JobKind, JobStatus, ModuleTrustLevel};
use ingestplane_repo::discoveries::CreateDiscoveryInput;
use ingestplane_repo::jobs;
use serde_json::json;

#[tokio::test]
async fn discovery_ingest_enqueues_extract_and_redirect_jobs() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-a", ModuleTrustLevel::Trusted).await;

    let created = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(
        &ctx.pool,
        CreateDiscoveryInput {
            origin_module_id: module_id,
            external_id: Some("ext-1".to_string()),
            url: Some("https://example.org/jobs/42".to_string()),
            title_hint: Some("Research Fellow".to_string()),
            text_hint: None,
            metadata: json!({}),
            resolve_redirects: None,
        },
        true,
    )
    .await
    .expect("create discovery");

    assert!(created.newly_created);
    assert!(created.normalized_url.is_some());

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().any(|j| j.kind == JobKind::Extract));
    assert!(queued.iter().any(|j| j.kind == JobKind::ResolveUrlRedirects));
}

#[tokio::test]
async fn duplicate_discovery_by_external_id_does_not_requeue() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-b", ModuleTrustLevel::Trusted).await;

    let input = || CreateDiscoveryInput {
        origin_module_id: module_id,
        external_id: Some("dup-1".to_string()),
        url: Some("https://example.org/jobs/7".to_string()),
        title_hint: None,
        text_hint: None,
        metadata: json!({}),
        resolve_redirects: Some(false),
    };

    let first = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(&ctx.pool, input(), true)
        .await
        .expect("first insert");
    let second = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(&ctx.pool, input(), true)
        .await
        .expect("second insert resolves to existing row");

    assert!(first.newly_created);
    assert!(!second.newly_created);
    assert_eq!(first.discovery_id, second.discovery_id);

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    assert_eq!(queued.len(), 1, "second call must not enqueue a duplicate extract job");
}

#[tokio::test]
async fn claim_is_exclusive_and_lease_bound() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-c", ModuleTrustLevel::Trusted).await;
    let other_module_id = ctx.seed_module("connector-d", ModuleTrustLevel::Trusted).await;

    let created = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(
        &ctx.pool,
        CreateDiscoveryInput {
            origin_module_id: module_id,
            external_id: None,
            url: Some("https://example.org/jobs/99".to_string()),
            title_hint: None,
            text_hint: None,
            metadata: json!({}),
            resolve_redirects: Some(false),
        },
        true,
    )
    .await
    .expect("create discovery");

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == JobKind::Extract).expect("extract job present");

    let claimed = jobs::claim(&ctx.pool, extract_job.id, other_module_id, 300).await.expect("claim");
    assert_eq!(claimed.status, JobStatus::Claimed);
    assert_eq!(claimed.locked_by_module_id, Some(other_module_id));

    let second_claim = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await;
    assert!(second_claim.is_err(), "a claimed job must not be claimable again");

    let _ = created.discovery_id;
}

#[tokio::test]
async fn submit_result_retries_failed_jobs_until_max_attempts() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-e", ModuleTrustLevel::Trusted).await;

    let created = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(
        &ctx.pool,
        CreateDiscoveryInput {
            origin_module_id: module_id,
            external_id: None,
            url: Some("https://example.org/jobs/5".to_string()),
            title_hint: None,
            text_hint: None,
            metadata: json!({}),
            resolve_redirects: Some(false),
        },
        true,
    )
    .await
    .expect("create discovery");
    let _ = created.discovery_id;

    let policy = jobs::RetryPolicy { job_max_attempts: 2, retry_base_seconds: 1, retry_max_seconds: 60 };

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == JobKind::Extract).unwrap();
    let claimed = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await.expect("claim");

    let after_first_failure = jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: claimed.id,
            module_id,
            requested: JobStatus::Failed,
            result_json: None,
            error_json: Some(json!({"message": "timeout"})),
        },
        &policy,
    )
    .await
    .expect("submit result");

    assert_eq!(after_first_failure.status, JobStatus::Queued, "first failure should be retried, not dead-lettered");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let reclaimed = jobs::claim(&ctx.pool, claimed.id, module_id, 300).await.expect("reclaim after retry window");

    let after_second_failure = jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: reclaimed.id,
            module_id,
            requested: JobStatus::Failed,
            result_json: None,
            error_json: Some(json!({"message": "timeout again"})),
        },
        &policy,
    )
    .await
    .expect("submit result");

    assert_eq!(after_second_failure.status, JobStatus::Failed, "final attempt must dead-letter, not retry forever");
}

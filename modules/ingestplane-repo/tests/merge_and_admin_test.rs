mod harness;

use harness::TestContext;
use ingestplane_common::{ModuleKind, ModuleTrustLevel};
use ingestplane_repo::discoveries::CreateDiscoveryInput;
use ingestplane_repo::jobs;
use ingestplane_repo::queries::{self, CreateModuleInput};
use serde_json::json;

async fn materialize_published(ctx: &TestContext, module_id: uuid::Uuid, url: &str) -> uuid::Uuid {
    ctx.seed_trust_policy(&format!("module:{module_id}"), true, false).await;

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

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued
        .iter()
        .find(|j| j.kind == ingestplane_common::JobKind::Extract && j.target_id == Some(created.discovery_id))
        .unwrap();
    let claimed = jobs::claim(&ctx.pool, extract_job.id, module_id, 300).await.expect("claim");

    jobs::submit_result(
        &ctx.pool,
        jobs::SubmitResultInput {
            job_id: claimed.id,
            module_id,
            requested: ingestplane_common::JobStatus::Done,
            result_json: Some(json!({
                "posting": {
                    "title": "Program Officer",
                    "organization_name": "Acme Foundation",
                    "canonical_url": url,
                    "normalized_url": url,
                    "canonical_hash": format!("hash:{url}"),
                },
                "dedupe_confidence": 0.95,
                "risk_flags": [],
            })),
            error_json: None,
        },
        &jobs::RetryPolicy { job_max_attempts: 5, retry_base_seconds: 30, retry_max_seconds: 3600 },
    )
    .await
    .expect("submit result");

    let candidates = queries::list_candidates(&ctx.pool, &queries::CandidateFilter { limit: 50, ..Default::default() })
        .await
        .expect("list candidates");
    candidates
        .into_iter()
        .find(|c| {
            c.extracted_fields.get("canonical_url").and_then(|v| v.as_str()) == Some(url)
        })
        .expect("candidate for url")
        .id
}

#[tokio::test]
async fn manual_merge_archives_secondary_and_keeps_primary_posting() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-merge", ModuleTrustLevel::Trusted).await;

    let primary_id = materialize_published(&ctx, module_id, "https://example.org/role/primary").await;
    let secondary_id = materialize_published(&ctx, module_id, "https://example.org/role/secondary").await;

    ingestplane_repo::moderation::merge_candidates(&ctx.pool, primary_id, secondary_id, "moderator-2", Some("same role, two listings"))
        .await
        .expect("manual merge");

    let decisions = queries::list_candidate_merge_decisions(&ctx.pool, primary_id).await.expect("list decisions");
    assert!(decisions.iter().any(|d| d.secondary_id == secondary_id));

    let secondary = queries::get_candidate(&ctx.pool, secondary_id).await.expect("get secondary");
    assert_eq!(secondary.state, ingestplane_common::CandidateState::Archived);
}

#[tokio::test]
async fn module_credential_rotation_disables_prior_keys() {
    let ctx = TestContext::new().await;
    let module = queries::create_module(
        &ctx.pool,
        CreateModuleInput {
            module_id: "connector-rotate".to_string(),
            name: "Rotating Connector".to_string(),
            kind: ModuleKind::Connector,
            trust_level: ModuleTrustLevel::SemiTrusted,
            scopes: vec!["discoveries:write".to_string()],
        },
    )
    .await
    .expect("create module");

    queries::rotate_module_credential(&ctx.pool, module.id, "first-key").await.expect("rotate 1");
    let first_hashes = queries::find_enabled_credential_hashes(&ctx.pool, module.id).await.expect("hashes 1");
    assert_eq!(first_hashes.len(), 1);

    queries::rotate_module_credential(&ctx.pool, module.id, "second-key").await.expect("rotate 2");
    let second_hashes = queries::find_enabled_credential_hashes(&ctx.pool, module.id).await.expect("hashes 2");
    assert_eq!(second_hashes.len(), 1, "rotating must disable the previous credential, not accumulate");
    assert_ne!(first_hashes[0], second_hashes[0]);
}

#[tokio::test]
async fn reap_expired_requeues_past_lease_jobs() {
    let ctx = TestContext::new().await;
    let module_id = ctx.seed_module("connector-reap", ModuleTrustLevel::Trusted).await;

    let created = ingestplane_repo::discoveries::create_discovery_and_enqueue_extract(
        &ctx.pool,
        CreateDiscoveryInput {
            origin_module_id: module_id,
            external_id: None,
            url: Some("https://example.org/reap/1".to_string()),
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

    let queued = jobs::list_queued(&ctx.pool, 10).await.expect("list queued");
    let extract_job = queued.iter().find(|j| j.kind == ingestplane_common::JobKind::Extract).unwrap();
    jobs::claim(&ctx.pool, extract_job.id, module_id, 1).await.expect("claim with a 1s lease");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let requeued = jobs::reap_expired(&ctx.pool, 10).await.expect("reap expired");
    assert_eq!(requeued, 1);

    let queued_again = jobs::list_queued(&ctx.pool, 10).await.expect("list queued again");
    assert!(queued_again.iter().any(|j| j.id == extract_job.id));
}

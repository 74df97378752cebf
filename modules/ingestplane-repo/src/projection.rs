//! Projection Engine (§4.7). Invoked from inside `jobs::submit_result` for
//! successful `extract` jobs. Resolves the posting projection, runs the
//! dedupe scorer against candidate postings, routes by merge/trust-policy
//! decision, and upserts the posting keyed by `canonical_hash`.

use ingestplane_common::{ActorType, CandidateState, MergeDecision, ModuleTrustLevel, PostingStatus, RepoError, RepoResult};
use ingestplane_domain::dedupe::{self, CandidateSnapshot, MergeThresholds};
use ingestplane_domain::extract_result::{parse_extract_result, DiscoveryFallback};
use ingestplane_domain::trust_policy::{min_confidence, resolve_publish_decision};
use ingestplane_events::AppendEvent;
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::merge::apply_candidate_merge;
use crate::models::JobRow;
use crate::trust_policy::resolve_trust_policy;

pub async fn apply_extract_result(
    tx: &mut Transaction<'_, Postgres>,
    discovery_id: Uuid,
    job: &JobRow,
    result_json: &Value,
) -> RepoResult<()> {
    let discovery = sqlx::query(
        "SELECT origin_module_id, title_hint, url, normalized_url, canonical_hash, metadata FROM discoveries WHERE id = $1",
    )
    .bind(discovery_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(RepoError::from)?
    .ok_or_else(|| RepoError::not_found(format!("discovery {discovery_id} not found")))?;

    let origin_module_id: Uuid = discovery.try_get("origin_module_id").map_err(RepoError::from)?;
    let title_hint: Option<String> = discovery.try_get("title_hint").map_err(RepoError::from)?;
    let url: Option<String> = discovery.try_get("url").map_err(RepoError::from)?;
    let normalized_url: Option<String> = discovery.try_get("normalized_url").map_err(RepoError::from)?;
    let canonical_hash: Option<String> = discovery.try_get("canonical_hash").map_err(RepoError::from)?;
    let metadata: Value = discovery.try_get("metadata").map_err(RepoError::from)?;

    let organization_name_hint = metadata.get("organization_name").and_then(|v| v.as_str()).map(str::to_string);

    let fallback = DiscoveryFallback {
        title_hint,
        organization_name_hint,
        url,
        normalized_url,
        canonical_hash,
    };

    let extracted = parse_extract_result(result_json, &fallback);

    let trust_level: ModuleTrustLevel = sqlx::query_scalar("SELECT trust_level FROM modules WHERE id = $1")
        .bind(origin_module_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    let (source_key, policy) =
        resolve_trust_policy(tx, extracted.source_key.as_deref(), origin_module_id, trust_level).await?;

    let decision = resolve_publish_decision(
        extracted.can_project_posting,
        trust_level,
        &policy,
        extracted.dedupe_confidence,
        &extracted.risk_flags,
    );

    let mut candidate_state = extracted.candidate_state_hint.unwrap_or(decision.candidate_state);
    if !extracted.can_project_posting {
        candidate_state = CandidateState::Processed;
    } else if !decision.publish {
        candidate_state = CandidateState::NeedsReview;
    }
    let mut posting_status = decision.posting_status;

    let candidate_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO posting_candidates (state, dedupe_bucket_key, dedupe_confidence, extracted_fields, risk_flags)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(candidate_state)
    .bind(&extracted.projection.canonical_hash)
    .bind(extracted.dedupe_confidence)
    .bind(&extracted.raw_payload)
    .bind(serde_json::to_value(&extracted.risk_flags).unwrap_or(Value::Array(vec![])))
    .fetch_one(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    sqlx::query("INSERT INTO candidate_discoveries (candidate_id, discovery_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(candidate_id)
        .bind(discovery_id)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    sqlx::query(
        "INSERT INTO candidate_evidence (candidate_id, evidence_id) \
         SELECT $1, id FROM evidence WHERE discovery_id = $2 \
         ON CONFLICT DO NOTHING",
    )
    .bind(candidate_id)
    .bind(discovery_id)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting_candidate",
            candidate_id,
            "materialized",
            ActorType::Machine,
            job.locked_by_module_id.map(|id| id.to_string()),
            serde_json::json!({"discovery_id": discovery_id, "job_id": job.id}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    let mut skipped_by_merge = false;

    if extracted.can_project_posting {
        let incoming = CandidateSnapshot {
            candidate_id: candidate_id.to_string(),
            canonical_hash: extracted.projection.canonical_hash.clone(),
            normalized_url: extracted.projection.normalized_url.clone(),
            canonical_url: extracted.projection.canonical_url.clone(),
            application_url: extracted.projection.application_url.clone(),
            title: extracted.projection.title.clone(),
            organization_name: extracted.projection.organization_name.clone(),
            description_text: extracted.projection.description_text.clone(),
            tags: extracted.projection.tags.clone(),
            areas: extracted.projection.areas.clone(),
            country: extracted.projection.country.clone(),
            region: extracted.projection.region.clone(),
            city: extracted.projection.city.clone(),
            named_entities: dedupe::extract_named_entities(&extracted.raw_payload),
            contact_domains: dedupe::extract_contact_domains(&extracted.raw_payload),
            has_posting: false,
        };

        let existing = find_merge_candidates(tx, &extracted).await?;

        if !existing.is_empty() {
            let merge_decision = dedupe::evaluate_merge_policy(&incoming, &existing, &MergeThresholds::default());

            match merge_decision.decision {
                MergeDecision::AutoMerged => {
                    let primary_id: Uuid = merge_decision
                        .primary_candidate_id
                        .as_deref()
                        .and_then(|id| id.parse().ok())
                        .ok_or_else(|| RepoError::conflict("auto-merge decision missing primary candidate id"))?;

                    let merge_result = apply_candidate_merge(
                        tx,
                        primary_id,
                        candidate_id,
                        MergeDecision::AutoMerged,
                        merge_decision.confidence,
                        job.locked_by_module_id.map(|id| id.to_string()).as_deref().unwrap_or("system"),
                        ActorType::System,
                        Some("dedupe_scorer_auto_merge"),
                    )
                    .await;

                    match merge_result {
                        Ok(_) => {
                            candidate_state = CandidateState::Archived;
                            posting_status = PostingStatus::Archived;
                            skipped_by_merge = true;
                        }
                        Err(_) => {
                            candidate_state = CandidateState::NeedsReview;
                            skipped_by_merge = true;
                            record_merge_decision(
                                tx,
                                primary_id,
                                candidate_id,
                                MergeDecision::NeedsReview,
                                merge_decision.confidence,
                                "system",
                                Some("conflict_auto_merge_blocked"),
                            )
                            .await?;
                        }
                    }
                }
                MergeDecision::NeedsReview | MergeDecision::Rejected => {
                    if let Some(primary_id) = merge_decision.primary_candidate_id.as_deref().and_then(|id| id.parse().ok()) {
                        candidate_state = CandidateState::NeedsReview;
                        record_merge_decision(
                            tx,
                            primary_id,
                            candidate_id,
                            merge_decision.decision,
                            merge_decision.confidence,
                            "system",
                            None,
                        )
                        .await?;
                    }
                }
                MergeDecision::None | MergeDecision::ManualMerged => {}
            }
        }
    }

    sqlx::query("UPDATE posting_candidates SET state = $2, updated_at = now() WHERE id = $1")
        .bind(candidate_id)
        .bind(candidate_state)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    if extracted.can_project_posting && !skipped_by_merge {
        let posting_id = upsert_posting(tx, candidate_id, &extracted.projection, posting_status).await?;

        ingestplane_events::append_in(
            tx,
            AppendEvent::new(
                "posting",
                posting_id,
                "projected",
                ActorType::System,
                job.locked_by_module_id.map(|id| id.to_string()),
                serde_json::json!({"candidate_id": candidate_id, "status": posting_status.as_str()}),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }

    let meets_confidence = min_confidence(trust_level, &policy)
        .map(|threshold| extracted.dedupe_confidence.map(|c| c >= threshold).unwrap_or(false))
        .unwrap_or(true);

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting_candidate",
            candidate_id,
            "trust_policy_applied",
            ActorType::System,
            None,
            serde_json::json!({
                "source_key": source_key,
                "trust_level": trust_level.as_str(),
                "min_confidence": min_confidence(trust_level, &policy),
                "meets_confidence": meets_confidence,
                "dedupe_confidence": extracted.dedupe_confidence,
                "risk_flags": extracted.risk_flags,
                "publish": decision.publish,
                "reason": decision.reason.as_str(),
                "candidate_state": candidate_state.as_str(),
                "posting_status": posting_status.as_str(),
            }),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    Ok(())
}

async fn find_merge_candidates(
    tx: &mut Transaction<'_, Postgres>,
    extracted: &ingestplane_domain::extract_result::ExtractResult,
) -> RepoResult<Vec<CandidateSnapshot>> {
    let rows = sqlx::query(
        r#"
        SELECT pc.id, pc.state, p.canonical_hash, p.normalized_url, p.canonical_url, p.application_url,
               p.title, p.organization_name, p.description_text, p.tags, p.areas, p.country, p.region, p.city
        FROM postings p
        JOIN posting_candidates pc ON pc.id = p.candidate_id
        WHERE pc.state <> 'archived'
          AND (
            p.canonical_hash = $1 OR p.normalized_url = $2 OR p.canonical_url = $3 OR p.application_url = $4
          )
        LIMIT 25
        "#,
    )
    .bind(&extracted.projection.canonical_hash)
    .bind(&extracted.projection.normalized_url)
    .bind(&extracted.projection.canonical_url)
    .bind(&extracted.projection.application_url)
    .fetch_all(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        let candidate_id: Uuid = row.try_get("id").map_err(RepoError::from)?;
        let tags: Value = row.try_get("tags").map_err(RepoError::from)?;
        let areas: Value = row.try_get("areas").map_err(RepoError::from)?;
        snapshots.push(CandidateSnapshot {
            candidate_id: candidate_id.to_string(),
            canonical_hash: row.try_get("canonical_hash").map_err(RepoError::from)?,
            normalized_url: row.try_get("normalized_url").map_err(RepoError::from)?,
            canonical_url: row.try_get("canonical_url").map_err(RepoError::from)?,
            application_url: row.try_get("application_url").map_err(RepoError::from)?,
            title: row.try_get("title").map_err(RepoError::from)?,
            organization_name: row.try_get("organization_name").map_err(RepoError::from)?,
            description_text: row.try_get("description_text").map_err(RepoError::from)?,
            tags: tags.as_array().map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default(),
            areas: areas.as_array().map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default(),
            country: row.try_get("country").map_err(RepoError::from)?,
            region: row.try_get("region").map_err(RepoError::from)?,
            city: row.try_get("city").map_err(RepoError::from)?,
            named_entities: Default::default(),
            contact_domains: Vec::new(),
            has_posting: true,
        });
    }
    Ok(snapshots)
}

async fn record_merge_decision(
    tx: &mut Transaction<'_, Postgres>,
    primary_id: Uuid,
    secondary_id: Uuid,
    decision: MergeDecision,
    confidence: Option<f64>,
    decided_by: &str,
    rationale: Option<&str>,
) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO candidate_merge_decisions (primary_id, secondary_id, decision, confidence, decided_by, rationale)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (primary_id, secondary_id) DO UPDATE SET
            decision = EXCLUDED.decision, confidence = EXCLUDED.confidence, rationale = EXCLUDED.rationale
        "#,
    )
    .bind(primary_id)
    .bind(secondary_id)
    .bind(decision)
    .bind(confidence)
    .bind(decided_by)
    .bind(rationale)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;
    Ok(())
}

async fn upsert_posting(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: Uuid,
    projection: &ingestplane_domain::extract_result::PostingProjection,
    status: PostingStatus,
) -> RepoResult<Uuid> {
    let tags = serde_json::to_value(&projection.tags).unwrap_or(Value::Array(vec![]));
    let areas = serde_json::to_value(&projection.areas).unwrap_or(Value::Array(vec![]));
    let source_refs = serde_json::to_value(&projection.source_refs).unwrap_or(Value::Array(vec![]));
    let publish_now = status == PostingStatus::Active;

    let row = sqlx::query(
        r#"
        INSERT INTO postings (
            candidate_id, title, canonical_url, normalized_url, canonical_hash, organization_name,
            country, region, city, tags, areas, description_text, application_url, deadline, source_refs,
            status, published_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                CASE WHEN $17 THEN now() ELSE NULL END)
        ON CONFLICT (canonical_hash) DO UPDATE SET
            candidate_id = EXCLUDED.candidate_id,
            title = EXCLUDED.title,
            canonical_url = EXCLUDED.canonical_url,
            normalized_url = EXCLUDED.normalized_url,
            organization_name = EXCLUDED.organization_name,
            country = EXCLUDED.country,
            region = EXCLUDED.region,
            city = EXCLUDED.city,
            tags = EXCLUDED.tags,
            areas = EXCLUDED.areas,
            description_text = EXCLUDED.description_text,
            application_url = EXCLUDED.application_url,
            deadline = EXCLUDED.deadline,
            source_refs = EXCLUDED.source_refs,
            status = EXCLUDED.status,
            published_at = COALESCE(postings.published_at, CASE WHEN $17 THEN now() ELSE NULL END),
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(candidate_id)
    .bind(&projection.title)
    .bind(&projection.canonical_url)
    .bind(&projection.normalized_url)
    .bind(&projection.canonical_hash)
    .bind(&projection.organization_name)
    .bind(&projection.country)
    .bind(&projection.region)
    .bind(&projection.city)
    .bind(&tags)
    .bind(&areas)
    .bind(&projection.description_text)
    .bind(&projection.application_url)
    .bind(&projection.deadline)
    .bind(&source_refs)
    .bind(status)
    .bind(publish_now)
    .fetch_one(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    let posting_id: Uuid = row.try_get("id").map_err(RepoError::from)?;
    Ok(posting_id)
}

//! Job Queue (§4.6): the scheduler. `list_queued`, `claim`, `submit_result`,
//! `reap_expired`, `enqueue_due_freshness`.

use chrono::{DateTime, Utc};
use ingestplane_common::{ActorType, JobKind, JobStatus, PostingStatus, RepoError, RepoResult};
use ingestplane_domain::retry::{is_terminal_attempt, retry_delay_seconds};
use ingestplane_events::AppendEvent;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::JobRow;
use crate::projection;
use crate::url_overrides::load_override_set;

pub struct RetryPolicy {
    pub job_max_attempts: i32,
    pub retry_base_seconds: i64,
    pub retry_max_seconds: i64,
}

pub async fn list_queued(pool: &PgPool, limit: i64) -> RepoResult<Vec<JobRow>> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT * FROM jobs
        WHERE status = 'queued' AND next_run_at <= now()
        ORDER BY next_run_at ASC, created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(RepoError::from)?;
    Ok(rows)
}

pub async fn claim(pool: &PgPool, job_id: Uuid, module_id: Uuid, lease_seconds: i64) -> RepoResult<JobRow> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let claimed = sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE jobs
        SET status = 'claimed',
            locked_by_module_id = $2,
            locked_at = now(),
            lease_expires_at = now() + make_interval(secs => $3),
            attempt = attempt + 1,
            updated_at = now()
        WHERE id = $1 AND status = 'queued' AND next_run_at <= now()
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(module_id)
    .bind(lease_seconds as f64)
    .fetch_optional(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    let mut job = match claimed {
        Some(job) => job,
        None => {
            let existing = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepoError::from)?;
            return match existing {
                None => Err(RepoError::not_found(format!("job {job_id} not found"))),
                Some(_) => Err(RepoError::conflict(format!("job {job_id} is not claimable"))),
            };
        }
    };

    if matches!(job.kind, JobKind::ResolveUrlRedirects) && job.target_type == "discovery" {
        let overrides = load_override_set(&mut tx).await.map_err(RepoError::from)?;
        let overrides_json = serde_json::to_value(
            overrides
                .overrides
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "host_suffix": o.host_suffix,
                        "strip_www": o.strip_www,
                        "force_https": o.force_https,
                        "strip_query_params": o.strip_query_params,
                        "strip_query_prefixes": o.strip_query_prefixes,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or(Value::Array(vec![]));

        let mut inputs = job.inputs_json.as_object().cloned().unwrap_or_default();
        inputs.insert("normalization_overrides_json".to_string(), overrides_json);
        let inputs = Value::Object(inputs);

        sqlx::query("UPDATE jobs SET inputs_json = $2 WHERE id = $1")
            .bind(job_id)
            .bind(&inputs)
            .execute(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        job.inputs_json = inputs;
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "job",
            job.id,
            "claimed",
            ActorType::Machine,
            Some(module_id.to_string()),
            serde_json::json!({"lease_seconds": lease_seconds}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    tx.commit().await.map_err(RepoError::from)?;
    Ok(job)
}

pub struct SubmitResultInput {
    pub job_id: Uuid,
    pub module_id: Uuid,
    pub requested: JobStatus,
    pub result_json: Option<Value>,
    pub error_json: Option<Value>,
}

pub async fn submit_result(
    pool: &PgPool,
    input: SubmitResultInput,
    policy: &RetryPolicy,
) -> RepoResult<JobRow> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let job = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
        .bind(input.job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepoError::from)?
        .ok_or_else(|| RepoError::not_found(format!("job {} not found", input.job_id)))?;

    if job.locked_by_module_id != Some(input.module_id) {
        return Err(RepoError::forbidden("job is not locked by this module"));
    }
    if job.status != JobStatus::Claimed {
        return Err(RepoError::conflict(format!("job {} is not claimed", job.id)));
    }

    let mut retry_delay: Option<i64> = None;
    let mut terminal_failure = false;
    let resolved = match input.requested {
        JobStatus::Failed => {
            if is_terminal_attempt(job.attempt, policy.job_max_attempts) {
                terminal_failure = true;
                JobStatus::Failed
            } else {
                let delay = retry_delay_seconds(job.attempt, policy.retry_base_seconds, policy.retry_max_seconds);
                retry_delay = Some(delay);
                JobStatus::Queued
            }
        }
        other => other,
    };

    let next_run_at = match (resolved, retry_delay) {
        (JobStatus::Queued, Some(delay)) => Utc::now() + chrono::Duration::seconds(delay),
        _ => job.next_run_at,
    };

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2,
            result_json = COALESCE($3, result_json),
            error_json = COALESCE($4, error_json),
            locked_by_module_id = NULL,
            locked_at = NULL,
            lease_expires_at = NULL,
            next_run_at = $5,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(resolved)
    .bind(&input.result_json)
    .bind(&input.error_json)
    .bind(next_run_at)
    .execute(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    if resolved == JobStatus::Done && job.kind == JobKind::Extract && job.target_type == "discovery" {
        if let Some(discovery_id) = job.target_id {
            let result = input.result_json.clone().unwrap_or(Value::Null);
            projection::apply_extract_result(&mut tx, discovery_id, &job, &result).await?;
        }
    }

    if job.kind == JobKind::CheckFreshness && job.target_type == "posting" {
        if let Some(posting_id) = job.target_id {
            if resolved == JobStatus::Done {
                apply_freshness_result(&mut tx, posting_id, input.result_json.as_ref()).await?;
            } else if resolved == JobStatus::Failed && terminal_failure {
                apply_freshness_downgrade(&mut tx, posting_id).await?;
            }
        }
    }

    if resolved == JobStatus::Done && job.kind == JobKind::ResolveUrlRedirects && job.target_type == "discovery" {
        if let Some(discovery_id) = job.target_id {
            let result = input.result_json.clone().unwrap_or(Value::Null);
            apply_redirect_resolution(&mut tx, discovery_id, &result).await?;
        }
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "job",
            job.id,
            "result_submitted",
            ActorType::Machine,
            Some(input.module_id.to_string()),
            serde_json::json!({
                "requested": input.requested.as_str(),
                "resolved": resolved.as_str(),
                "attempt": job.attempt,
                "max_attempts": policy.job_max_attempts,
                "retry_delay_seconds": retry_delay,
            }),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    if retry_delay.is_some() {
        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new(
                "job",
                job.id,
                "retry_scheduled",
                ActorType::System,
                None,
                serde_json::json!({"retry_delay_seconds": retry_delay, "attempt": job.attempt}),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }
    if terminal_failure {
        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new(
                "job",
                job.id,
                "dead_lettered",
                ActorType::System,
                None,
                serde_json::json!({"attempt": job.attempt, "max_attempts": policy.job_max_attempts}),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }

    tx.commit().await.map_err(RepoError::from)?;

    let updated = JobRow { status: resolved, next_run_at, ..job };
    Ok(updated)
}

async fn apply_freshness_result(
    tx: &mut Transaction<'_, Postgres>,
    posting_id: Uuid,
    result_json: Option<&Value>,
) -> RepoResult<()> {
    let Some(recommended) = result_json
        .and_then(|v| v.get("recommended_status"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<PostingStatus>().ok())
    else {
        return Ok(());
    };

    let current: Option<PostingStatus> = sqlx::query_scalar("SELECT status FROM postings WHERE id = $1 FOR UPDATE")
        .bind(posting_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(RepoError::from)?;
    let Some(current) = current else { return Ok(()) };

    ingestplane_domain::state_machine::validate_posting_transition(current, recommended)?;

    sqlx::query("UPDATE postings SET status = $2, updated_at = now() WHERE id = $1")
        .bind(posting_id)
        .bind(recommended)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting",
            posting_id,
            "freshness_result_applied",
            ActorType::System,
            None,
            serde_json::json!({"from": current.as_str(), "to": recommended.as_str()}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    Ok(())
}

async fn apply_freshness_downgrade(tx: &mut Transaction<'_, Postgres>, posting_id: Uuid) -> RepoResult<()> {
    let current: Option<PostingStatus> = sqlx::query_scalar("SELECT status FROM postings WHERE id = $1 FOR UPDATE")
        .bind(posting_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(RepoError::from)?;
    let Some(current) = current else { return Ok(()) };

    let Some(downgraded) = ingestplane_domain::freshness::terminal_failure_downgrade(current) else {
        return Ok(());
    };

    sqlx::query("UPDATE postings SET status = $2, updated_at = now() WHERE id = $1")
        .bind(posting_id)
        .bind(downgraded)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting",
            posting_id,
            "freshness_retry_exhausted",
            ActorType::System,
            None,
            serde_json::json!({"from": current.as_str(), "to": downgraded.as_str()}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    Ok(())
}

async fn apply_redirect_resolution(
    tx: &mut Transaction<'_, Postgres>,
    discovery_id: Uuid,
    payload: &Value,
) -> RepoResult<()> {
    use ingestplane_domain::coerce::{coerce_int, coerce_text};
    use ingestplane_domain::url_canon::canonical_hash;

    let resolved_url = coerce_text(payload.get("resolved_url"));
    let resolved_normalized_url = coerce_text(payload.get("resolved_normalized_url"));
    let resolved_canonical_hash = coerce_text(payload.get("resolved_canonical_hash"));

    if resolved_url.is_none() && resolved_normalized_url.is_none() && resolved_canonical_hash.is_none() {
        return Ok(());
    }

    let discovery = sqlx::query(
        "SELECT origin_module_id, external_id, url, normalized_url, canonical_hash FROM discoveries WHERE id = $1 FOR UPDATE",
    )
    .bind(discovery_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(RepoError::from)?;
    let Some(discovery) = discovery else { return Ok(()) };

    let origin_module_id: Uuid = discovery.try_get("origin_module_id").map_err(RepoError::from)?;
    let external_id: Option<String> = discovery.try_get("external_id").map_err(RepoError::from)?;
    let current_url: Option<String> = discovery.try_get("url").map_err(RepoError::from)?;
    let current_normalized_url: Option<String> = discovery.try_get("normalized_url").map_err(RepoError::from)?;
    let current_canonical_hash: Option<String> = discovery.try_get("canonical_hash").map_err(RepoError::from)?;

    let next_url = resolved_url.or_else(|| current_url.clone());
    let next_normalized_url = resolved_normalized_url.or_else(|| current_normalized_url.clone());
    let next_canonical_hash = resolved_canonical_hash
        .or_else(|| next_normalized_url.as_deref().map(canonical_hash))
        .or_else(|| current_canonical_hash.clone());

    if next_url == current_url && next_normalized_url == current_normalized_url && next_canonical_hash == current_canonical_hash {
        return Ok(());
    }

    if external_id.is_none() {
        if let Some(normalized) = &next_normalized_url {
            let conflict: Option<Uuid> = sqlx::query_scalar(
                "SELECT id FROM discoveries WHERE id <> $1 AND origin_module_id = $2 AND external_id IS NULL AND normalized_url = $3",
            )
            .bind(discovery_id)
            .bind(origin_module_id)
            .bind(normalized)
            .fetch_optional(&mut **tx)
            .await
            .map_err(RepoError::from)?;

            if conflict.is_some() {
                ingestplane_events::append_in(
                    tx,
                    AppendEvent::new(
                        "discovery",
                        discovery_id,
                        "redirect_resolution_conflict",
                        ActorType::System,
                        None,
                        serde_json::json!({
                            "resolved_url": next_url,
                            "resolved_normalized_url": next_normalized_url,
                            "redirect_hop_count": coerce_int(payload.get("redirect_hop_count")),
                        }),
                    ),
                )
                .await
                .map_err(RepoError::from)?;
                return Ok(());
            }
        }
    }

    sqlx::query(
        "UPDATE discoveries SET url = $2, normalized_url = $3, canonical_hash = $4, updated_at = now() WHERE id = $1",
    )
    .bind(discovery_id)
    .bind(&next_url)
    .bind(&next_normalized_url)
    .bind(&next_canonical_hash)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "discovery",
            discovery_id,
            "redirect_resolved",
            ActorType::System,
            None,
            serde_json::json!({
                "url": next_url,
                "normalized_url": next_normalized_url,
                "canonical_hash": next_canonical_hash,
            }),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    Ok(())
}

pub async fn reap_expired(pool: &PgPool, limit: i64) -> RepoResult<i64> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let rows: Vec<Uuid> = sqlx::query_scalar(
        r#"
        WITH expired AS (
            SELECT id FROM jobs
            WHERE status = 'claimed' AND lease_expires_at <= now()
            ORDER BY lease_expires_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs
        SET status = 'queued', locked_by_module_id = NULL, locked_at = NULL, lease_expires_at = NULL, next_run_at = now(), updated_at = now()
        WHERE id IN (SELECT id FROM expired)
        RETURNING id
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    for job_id in &rows {
        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new("job", *job_id, "lease_requeued", ActorType::System, None, Value::Null),
        )
        .await
        .map_err(RepoError::from)?;
    }

    tx.commit().await.map_err(RepoError::from)?;
    Ok(rows.len() as i64)
}

pub struct FreshnessThresholds {
    pub freshness_check_interval_hours: i64,
    pub stale_after_hours: i64,
    pub archive_after_hours: i64,
}

pub async fn enqueue_due_freshness(
    pool: &PgPool,
    limit: i64,
    thresholds: &FreshnessThresholds,
) -> RepoResult<i64> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let due: Vec<(Uuid, PostingStatus, DateTime<Utc>)> = sqlx::query_as(
        r#"
        WITH due AS (
            SELECT p.id, p.status, p.updated_at
            FROM postings p
            WHERE p.status IN ('active', 'stale')
              AND NOT EXISTS (
                  SELECT 1 FROM jobs j
                  WHERE j.kind = 'check_freshness' AND j.target_type = 'posting' AND j.target_id = p.id
                    AND j.status IN ('queued', 'claimed')
              )
              AND NOT EXISTS (
                  SELECT 1 FROM jobs j
                  WHERE j.kind = 'check_freshness' AND j.target_type = 'posting' AND j.target_id = p.id
                    AND j.status IN ('done', 'failed', 'dead_letter')
                    AND j.updated_at > now() - make_interval(hours => $2)
              )
            ORDER BY p.updated_at ASC
            LIMIT $1
            FOR UPDATE OF p SKIP LOCKED
        )
        SELECT id, status, updated_at FROM due
        "#,
    )
    .bind(limit)
    .bind(thresholds.freshness_check_interval_hours as f64)
    .fetch_all(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    let mut enqueued = 0i64;
    for (posting_id, status, updated_at) in due {
        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, target_type, target_id, inputs_json, status, attempt, next_run_at)
            VALUES ($1, 'check_freshness', 'posting', $2, $3, 'queued', 0, now())
            "#,
        )
        .bind(job_id)
        .bind(posting_id)
        .bind(serde_json::json!({
            "posting_id": posting_id,
            "posting_status": status.as_str(),
            "posting_updated_at": updated_at,
            "stale_after_hours": thresholds.stale_after_hours,
            "archive_after_hours": thresholds.archive_after_hours,
        }))
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from)?;

        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new(
                "job",
                job_id,
                "freshness_enqueued",
                ActorType::System,
                None,
                serde_json::json!({"posting_id": posting_id, "posting_status": status.as_str()}),
            ),
        )
        .await
        .map_err(RepoError::from)?;

        enqueued += 1;
    }

    tx.commit().await.map_err(RepoError::from)?;
    Ok(enqueued)
}

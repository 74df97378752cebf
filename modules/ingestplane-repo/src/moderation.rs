//! Moderation Service (§4.8). Three candidate operations plus one posting
//! operation, all transactional and gated by a human actor.

use ingestplane_common::{ActorType, CandidateState, MergeDecision, PostingStatus, RepoError, RepoResult};
use ingestplane_domain::state_machine::{
    derive_candidate_state_for_posting, derive_posting_status_for_candidate, validate_candidate_transition,
    validate_posting_transition,
};
use ingestplane_events::AppendEvent;
use sqlx::PgPool;
use uuid::Uuid;

use crate::merge::apply_candidate_merge;

pub async fn update_candidate_state(
    pool: &PgPool,
    candidate_id: Uuid,
    to_state: CandidateState,
    actor_user_id: &str,
    reason: Option<&str>,
) -> RepoResult<()> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let from_state: CandidateState =
        sqlx::query_scalar("SELECT state FROM posting_candidates WHERE id = $1 FOR UPDATE")
            .bind(candidate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepoError::from)?
            .ok_or_else(|| RepoError::not_found(format!("candidate {candidate_id} not found")))?;

    validate_candidate_transition(from_state, to_state)?;

    if to_state == CandidateState::Published {
        let has_posting: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM postings WHERE candidate_id = $1)")
            .bind(candidate_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        if !has_posting {
            return Err(RepoError::conflict("cannot publish a candidate with no linked posting"));
        }
    }

    sqlx::query("UPDATE posting_candidates SET state = $2, updated_at = now() WHERE id = $1")
        .bind(candidate_id)
        .bind(to_state)
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from)?;

    if let Some(posting_status) = derive_posting_status_for_candidate(to_state) {
        apply_derived_posting_status(&mut tx, candidate_id, posting_status, actor_user_id, reason).await?;
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "posting_candidate",
            candidate_id,
            "state_changed",
            ActorType::Human,
            Some(actor_user_id.to_string()),
            serde_json::json!({"from": from_state.as_str(), "to": to_state.as_str(), "reason": reason}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    tx.commit().await.map_err(RepoError::from)?;
    Ok(())
}

pub async fn override_candidate_state(
    pool: &PgPool,
    candidate_id: Uuid,
    to_state: CandidateState,
    posting_status: Option<PostingStatus>,
    actor_user_id: &str,
    reason: Option<&str>,
) -> RepoResult<()> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let from_state: CandidateState =
        sqlx::query_scalar("SELECT state FROM posting_candidates WHERE id = $1 FOR UPDATE")
            .bind(candidate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepoError::from)?
            .ok_or_else(|| RepoError::not_found(format!("candidate {candidate_id} not found")))?;

    if to_state == CandidateState::Published {
        let has_posting: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM postings WHERE candidate_id = $1)")
            .bind(candidate_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        if !has_posting {
            return Err(RepoError::conflict("cannot publish a candidate with no linked posting"));
        }
    }

    sqlx::query("UPDATE posting_candidates SET state = $2, updated_at = now() WHERE id = $1")
        .bind(candidate_id)
        .bind(to_state)
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from)?;

    if let Some(status) = posting_status {
        apply_derived_posting_status(&mut tx, candidate_id, status, actor_user_id, reason).await?;
    } else if let Some(status) = derive_posting_status_for_candidate(to_state) {
        apply_derived_posting_status(&mut tx, candidate_id, status, actor_user_id, reason).await?;
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "posting_candidate",
            candidate_id,
            "state_overridden",
            ActorType::Human,
            Some(actor_user_id.to_string()),
            serde_json::json!({"from": from_state.as_str(), "to": to_state.as_str(), "reason": reason}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    tx.commit().await.map_err(RepoError::from)?;
    Ok(())
}

pub async fn merge_candidates(
    pool: &PgPool,
    primary_id: Uuid,
    secondary_id: Uuid,
    actor_user_id: &str,
    reason: Option<&str>,
) -> RepoResult<()> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;
    apply_candidate_merge(
        &mut tx,
        primary_id,
        secondary_id,
        MergeDecision::ManualMerged,
        None,
        actor_user_id,
        ActorType::Human,
        reason,
    )
    .await?;
    tx.commit().await.map_err(RepoError::from)?;
    Ok(())
}

pub async fn update_posting_status(
    pool: &PgPool,
    posting_id: Uuid,
    to_status: PostingStatus,
    actor_user_id: &str,
    reason: Option<&str>,
) -> RepoResult<()> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let row = sqlx::query_as::<_, (PostingStatus, Option<Uuid>)>(
        "SELECT status, candidate_id FROM postings WHERE id = $1 FOR UPDATE",
    )
    .bind(posting_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(RepoError::from)?
    .ok_or_else(|| RepoError::not_found(format!("posting {posting_id} not found")))?;
    let (from_status, candidate_id) = row;

    validate_posting_transition(from_status, to_status)?;

    let derived_candidate_state = derive_candidate_state_for_posting(to_status);
    let mut candidate_from_state = None;
    if let Some(candidate_id) = candidate_id {
        let current: CandidateState = sqlx::query_scalar("SELECT state FROM posting_candidates WHERE id = $1 FOR UPDATE")
            .bind(candidate_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        validate_candidate_transition(current, derived_candidate_state)?;
        candidate_from_state = Some(current);
    }

    sqlx::query(
        r#"
        UPDATE postings
        SET status = $2, published_at = CASE WHEN $2 = 'active' THEN COALESCE(published_at, now()) ELSE published_at END, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(posting_id)
    .bind(to_status)
    .execute(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    if let Some(candidate_id) = candidate_id {
        sqlx::query("UPDATE posting_candidates SET state = $2, updated_at = now() WHERE id = $1")
            .bind(candidate_id)
            .bind(derived_candidate_state)
            .execute(&mut *tx)
            .await
            .map_err(RepoError::from)?;

        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new(
                "posting_candidate",
                candidate_id,
                "state_changed",
                ActorType::Human,
                Some(actor_user_id.to_string()),
                serde_json::json!({
                    "from": candidate_from_state.map(|s| s.as_str()),
                    "to": derived_candidate_state.as_str(),
                    "reason": reason,
                    "via": "posting_status_update",
                }),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "posting",
            posting_id,
            "status_changed",
            ActorType::Human,
            Some(actor_user_id.to_string()),
            serde_json::json!({"from": from_status.as_str(), "to": to_status.as_str(), "reason": reason}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    tx.commit().await.map_err(RepoError::from)?;
    Ok(())
}

async fn apply_derived_posting_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    candidate_id: Uuid,
    status: PostingStatus,
    actor_user_id: &str,
    reason: Option<&str>,
) -> RepoResult<()> {
    let posting: Option<(Uuid, PostingStatus)> =
        sqlx::query_as("SELECT id, status FROM postings WHERE candidate_id = $1 FOR UPDATE")
            .bind(candidate_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(RepoError::from)?;
    let Some((posting_id, current_status)) = posting else { return Ok(()) };

    if current_status == status {
        return Ok(());
    }
    validate_posting_transition(current_status, status)?;

    sqlx::query(
        r#"
        UPDATE postings
        SET status = $2, published_at = CASE WHEN $2 = 'active' THEN COALESCE(published_at, now()) ELSE published_at END, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(posting_id)
    .bind(status)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting",
            posting_id,
            "status_changed",
            ActorType::Human,
            Some(actor_user_id.to_string()),
            serde_json::json!({
                "from": current_status.as_str(),
                "to": status.as_str(),
                "reason": reason,
                "via": "candidate_state_update",
            }),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    Ok(())
}

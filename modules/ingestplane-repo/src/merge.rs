//! `apply_candidate_merge`, shared between the Projection Engine's
//! auto-merge routing (§4.7 step 8) and Moderation's manual merge (§4.8).
//! Locks both candidate rows in ascending id order to prevent deadlock
//! under concurrent merges (§5).

use ingestplane_common::{ActorType, CandidateState, MergeDecision, RepoError, RepoResult};
use ingestplane_events::AppendEvent;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub struct MergeOutcome {
    pub reassigned_posting: bool,
}

#[allow(clippy::too_many_arguments)]
pub async fn apply_candidate_merge(
    tx: &mut Transaction<'_, Postgres>,
    primary_id: Uuid,
    secondary_id: Uuid,
    decision: MergeDecision,
    confidence: Option<f64>,
    decided_by: &str,
    actor_type: ActorType,
    rationale: Option<&str>,
) -> RepoResult<MergeOutcome> {
    if primary_id == secondary_id {
        return Err(RepoError::conflict("cannot merge a candidate into itself"));
    }

    let (first, second) = if primary_id < secondary_id { (primary_id, secondary_id) } else { (secondary_id, primary_id) };
    sqlx::query("SELECT id FROM posting_candidates WHERE id IN ($1, $2) ORDER BY id FOR UPDATE")
        .bind(first)
        .bind(second)
        .fetch_all(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    let primary_posting: Option<Uuid> = sqlx::query_scalar("SELECT id FROM postings WHERE candidate_id = $1")
        .bind(primary_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(RepoError::from)?;
    let secondary_posting: Option<Uuid> = sqlx::query_scalar("SELECT id FROM postings WHERE candidate_id = $1")
        .bind(secondary_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    if primary_posting.is_some() && secondary_posting.is_some() {
        return Err(RepoError::conflict(
            "both candidates already have distinct postings; refusing to merge",
        ));
    }

    let mut reassigned_posting = false;
    if primary_posting.is_none() {
        if let Some(posting_id) = secondary_posting {
            sqlx::query("UPDATE postings SET candidate_id = $2, updated_at = now() WHERE id = $1")
                .bind(posting_id)
                .bind(primary_id)
                .execute(&mut **tx)
                .await
                .map_err(RepoError::from)?;
            reassigned_posting = true;
        }
    }

    sqlx::query(
        "INSERT INTO candidate_discoveries (candidate_id, discovery_id) \
         SELECT $1, discovery_id FROM candidate_discoveries WHERE candidate_id = $2 \
         ON CONFLICT DO NOTHING",
    )
    .bind(primary_id)
    .bind(secondary_id)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    sqlx::query(
        "INSERT INTO candidate_evidence (candidate_id, evidence_id) \
         SELECT $1, evidence_id FROM candidate_evidence WHERE candidate_id = $2 \
         ON CONFLICT DO NOTHING",
    )
    .bind(primary_id)
    .bind(secondary_id)
    .execute(&mut **tx)
    .await
    .map_err(RepoError::from)?;

    sqlx::query("UPDATE posting_candidates SET state = $2, updated_at = now() WHERE id = $1")
        .bind(secondary_id)
        .bind(CandidateState::Archived)
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from)?;

    sqlx::query(
        r#"
        INSERT INTO candidate_merge_decisions (primary_id, secondary_id, decision, confidence, decided_by, rationale)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (primary_id, secondary_id) DO UPDATE SET
            decision = EXCLUDED.decision, confidence = EXCLUDED.confidence,
            decided_by = EXCLUDED.decided_by, rationale = EXCLUDED.rationale
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

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting_candidate",
            primary_id,
            "merge_applied",
            actor_type,
            Some(decided_by.to_string()),
            serde_json::json!({"secondary_id": secondary_id, "decision": decision.as_str(), "rationale": rationale}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    ingestplane_events::append_in(
        tx,
        AppendEvent::new(
            "posting_candidate",
            secondary_id,
            "merged_away",
            actor_type,
            Some(decided_by.to_string()),
            serde_json::json!({"primary_id": primary_id}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    if reassigned_posting {
        ingestplane_events::append_in(
            tx,
            AppendEvent::new(
                "posting_candidate",
                primary_id,
                "candidate_reassigned",
                actor_type,
                Some(decided_by.to_string()),
                serde_json::json!({"from": secondary_id, "to": primary_id}),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }

    Ok(MergeOutcome { reassigned_posting })
}

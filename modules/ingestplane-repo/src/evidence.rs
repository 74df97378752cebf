//! Evidence recording (§3, §6 `POST /evidence`). Attached to a discovery at
//! capture time; no state machine involved, so a single insert suffices.

use ingestplane_common::{ActorType, EvidenceKind, RepoError, RepoResult};
use ingestplane_events::AppendEvent;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecordEvidenceInput {
    pub discovery_id: Option<Uuid>,
    pub kind: EvidenceKind,
    pub uri: String,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub byte_size: Option<i64>,
    pub metadata: Value,
}

pub async fn record_evidence(
    pool: &PgPool,
    actor_id: &str,
    input: RecordEvidenceInput,
) -> RepoResult<Uuid> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let evidence_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO evidence (discovery_id, kind, uri, content_hash, content_type, byte_size, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(input.discovery_id)
    .bind(input.kind)
    .bind(&input.uri)
    .bind(&input.content_hash)
    .bind(&input.content_type)
    .bind(input.byte_size)
    .bind(&input.metadata)
    .fetch_one(&mut *tx)
    .await
    .map_err(RepoError::from)?;

    if let Some(candidate_id) = find_candidate_for_discovery(&mut tx, input.discovery_id).await? {
        sqlx::query(
            "INSERT INTO candidate_evidence (candidate_id, evidence_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(candidate_id)
        .bind(evidence_id)
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from)?;
    }

    ingestplane_events::append_in(
        &mut tx,
        AppendEvent::new(
            "evidence",
            evidence_id,
            "captured",
            ActorType::Machine,
            Some(actor_id.to_string()),
            serde_json::json!({"discovery_id": input.discovery_id, "kind": input.kind.as_str()}),
        ),
    )
    .await
    .map_err(RepoError::from)?;

    tx.commit().await.map_err(RepoError::from)?;
    Ok(evidence_id)
}

async fn find_candidate_for_discovery(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    discovery_id: Option<Uuid>,
) -> RepoResult<Option<Uuid>> {
    let Some(discovery_id) = discovery_id else { return Ok(None) };
    let candidate_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT candidate_id FROM candidate_discoveries WHERE discovery_id = $1 LIMIT 1",
    )
    .bind(discovery_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(RepoError::from)?;
    Ok(candidate_id)
}

//! ProvenanceLog — append-only audit store backed by Postgres.
//!
//! Every state-changing decision in the job queue, projection engine, and
//! moderation service appends exactly one row per mutated entity, inside the
//! same transaction as the mutation itself (P4). Rows are never updated or
//! deleted. Replay is not supported — this is the audit surface, not a CDC
//! stream.

use anyhow::Result;
use sqlx::{PgPool, Postgres, Transaction};

use crate::types::{AppendEvent, ProvenanceEvent};

#[derive(Clone)]
pub struct ProvenanceLog {
    pool: PgPool,
}

impl ProvenanceLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a row using the store's own pool. Use `append_in` instead when
    /// the event must land in the same transaction as the mutation it
    /// records — which is every core operation in §4.5–§4.8.
    pub async fn append(&self, event: AppendEvent) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = append_in(&mut tx, event).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn read_by_entity(
        &self,
        entity_type: &str,
        entity_id: uuid::Uuid,
    ) -> Result<Vec<ProvenanceEvent>> {
        let rows = sqlx::query_as::<_, ProvenanceEvent>(
            r#"
            SELECT id, entity_type, entity_id, event_type, actor_type, actor_id, payload, created_at
            FROM provenance_events
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY id ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn read_by_type(
        &self,
        entity_type: &str,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<ProvenanceEvent>> {
        let rows = sqlx::query_as::<_, ProvenanceEvent>(
            r#"
            SELECT id, entity_type, entity_id, event_type, actor_type, actor_id, payload, created_at
            FROM provenance_events
            WHERE entity_type = $1 AND event_type = $2
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(entity_type)
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn latest_id(&self) -> Result<i64> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(id) FROM provenance_events").fetch_one(&self.pool).await?;
        Ok(row.0.unwrap_or(0))
    }
}

/// Append a provenance row within a caller-owned transaction. Every core
/// operation in `ingestplane-repo` calls this rather than `ProvenanceLog::append`
/// so that a rollback of the business mutation also rolls back its audit
/// row — a visible mutation always implies its audit row exists, never the
/// reverse split.
pub async fn append_in(tx: &mut Transaction<'_, Postgres>, event: AppendEvent) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO provenance_events (entity_type, entity_id, event_type, actor_type, actor_id, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(&event.entity_type)
    .bind(event.entity_id)
    .bind(&event.event_type)
    .bind(event.actor_type)
    .bind(&event.actor_id)
    .bind(&event.payload)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.0)
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProvenanceEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ProvenanceEvent {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            event_type: row.try_get("event_type")?,
            actor_type: row.try_get("actor_type")?,
            actor_id: row.try_get("actor_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

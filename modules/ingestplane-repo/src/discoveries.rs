//! Discovery Ingestor (§4.5): `create_discovery_and_enqueue_extract`.

use ingestplane_common::{ActorType, JobKind, JobStatus, RepoError, RepoResult};
use ingestplane_domain::url_canon::{canonical_hash, normalize_url};
use ingestplane_events::AppendEvent;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::DiscoveryRow;
use crate::url_overrides::load_override_set;

#[derive(Debug, Clone)]
pub struct CreateDiscoveryInput {
    pub origin_module_id: Uuid,
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title_hint: Option<String>,
    pub text_hint: Option<String>,
    pub metadata: Value,
    /// Per-discovery override, falling through to a deployment default when
    /// `None` (§4.5 step 3).
    pub resolve_redirects: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CreatedDiscovery {
    pub discovery_id: Uuid,
    pub normalized_url: Option<String>,
    pub canonical_hash: Option<String>,
    pub newly_created: bool,
}

pub async fn create_discovery_and_enqueue_extract(
    pool: &PgPool,
    input: CreateDiscoveryInput,
    default_resolve_redirects: bool,
) -> RepoResult<CreatedDiscovery> {
    let mut tx = pool.begin().await.map_err(RepoError::from)?;

    let overrides = load_override_set(&mut tx).await.map_err(RepoError::from)?;
    let normalized_url = input.url.as_deref().and_then(|raw| normalize_url(raw, &overrides));
    let hash = normalized_url.as_deref().map(canonical_hash);

    let inserted: Option<DiscoveryRow> = if input.external_id.is_some() {
        sqlx::query_as::<_, DiscoveryRow>(
            r#"
            INSERT INTO discoveries
                (origin_module_id, external_id, url, normalized_url, canonical_hash, title_hint, text_hint, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (origin_module_id, external_id) WHERE external_id IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(input.origin_module_id)
        .bind(&input.external_id)
        .bind(&input.url)
        .bind(&normalized_url)
        .bind(&hash)
        .bind(&input.title_hint)
        .bind(&input.text_hint)
        .bind(&input.metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepoError::from)?
    } else if normalized_url.is_some() {
        sqlx::query_as::<_, DiscoveryRow>(
            r#"
            INSERT INTO discoveries
                (origin_module_id, external_id, url, normalized_url, canonical_hash, title_hint, text_hint, metadata)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (origin_module_id, normalized_url) WHERE external_id IS NULL AND normalized_url IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(input.origin_module_id)
        .bind(&input.url)
        .bind(&normalized_url)
        .bind(&hash)
        .bind(&input.title_hint)
        .bind(&input.text_hint)
        .bind(&input.metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepoError::from)?
    } else {
        sqlx::query_as::<_, DiscoveryRow>(
            r#"
            INSERT INTO discoveries
                (origin_module_id, external_id, url, normalized_url, canonical_hash, title_hint, text_hint, metadata)
            VALUES ($1, NULL, $2, NULL, NULL, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(input.origin_module_id)
        .bind(&input.url)
        .bind(&input.title_hint)
        .bind(&input.text_hint)
        .bind(&input.metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepoError::from)?
    };

    let (row, newly_created) = match inserted {
        Some(row) => (row, true),
        None => {
            let existing = if let Some(external_id) = &input.external_id {
                sqlx::query_as::<_, DiscoveryRow>(
                    "SELECT * FROM discoveries WHERE origin_module_id = $1 AND external_id = $2",
                )
                .bind(input.origin_module_id)
                .bind(external_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepoError::from)?
            } else if let Some(normalized) = &normalized_url {
                sqlx::query_as::<_, DiscoveryRow>(
                    "SELECT * FROM discoveries WHERE origin_module_id = $1 AND external_id IS NULL AND normalized_url = $2",
                )
                .bind(input.origin_module_id)
                .bind(normalized)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepoError::from)?
            } else {
                None
            };
            match existing {
                Some(row) => (row, false),
                None => return Err(RepoError::conflict("discovery insert elided but no existing row found")),
            }
        }
    };

    if newly_created {
        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, target_type, target_id, inputs_json, status, attempt, next_run_at)
            VALUES ($1, $2, 'discovery', $3, $4, $5, 0, now())
            "#,
        )
        .bind(job_id)
        .bind(JobKind::Extract)
        .bind(row.id)
        .bind(serde_json::json!({"discovery_id": row.id}))
        .bind(JobStatus::Queued)
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from)?;

        if input.resolve_redirects.unwrap_or(default_resolve_redirects) {
            let redirect_job_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO jobs (id, kind, target_type, target_id, inputs_json, status, attempt, next_run_at)
                VALUES ($1, $2, 'discovery', $3, $4, $5, 0, now())
                "#,
            )
            .bind(redirect_job_id)
            .bind(JobKind::ResolveUrlRedirects)
            .bind(row.id)
            .bind(serde_json::json!({
                "discovery_id": row.id,
                "url": row.url,
                "normalized_url": row.normalized_url,
                "canonical_hash": row.canonical_hash,
            }))
            .bind(JobStatus::Queued)
            .execute(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        }

        ingestplane_events::append_in(
            &mut tx,
            AppendEvent::new(
                "discovery",
                row.id,
                "ingested",
                ActorType::Machine,
                Some(input.origin_module_id.to_string()),
                serde_json::json!({"external_id": row.external_id, "normalized_url": row.normalized_url}),
            ),
        )
        .await
        .map_err(RepoError::from)?;
    }

    tx.commit().await.map_err(RepoError::from)?;

    Ok(CreatedDiscovery {
        discovery_id: row.id,
        normalized_url: row.normalized_url,
        canonical_hash: row.canonical_hash,
        newly_created,
    })
}

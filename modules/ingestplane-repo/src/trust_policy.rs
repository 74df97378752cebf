//! Trust-policy lookup (§4.4): resolves the effective `SourceTrustPolicy`
//! row for a discovery, falling through `source_key_hint` →
//! `module:{origin_module_id}` → a synthesized default. The actual publish
//! decision is pure logic in `ingestplane_domain::trust_policy`.

use ingestplane_common::{ModuleTrustLevel, RepoError, RepoResult};
use ingestplane_domain::trust_policy::{default_policy, TrustPolicy};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::SourceTrustPolicyRow;

pub async fn resolve_trust_policy(
    tx: &mut Transaction<'_, Postgres>,
    source_key_hint: Option<&str>,
    origin_module_id: Uuid,
    trust_level: ModuleTrustLevel,
) -> RepoResult<(String, TrustPolicy)> {
    let module_key = format!("module:{origin_module_id}");

    for candidate_key in [source_key_hint, Some(module_key.as_str())].into_iter().flatten() {
        if let Some(row) = fetch_enabled_policy(tx, candidate_key).await? {
            return Ok((
                candidate_key.to_string(),
                TrustPolicy {
                    auto_publish: row.auto_publish,
                    requires_moderation: row.requires_moderation,
                    rules_json: row.rules_json,
                },
            ));
        }
    }

    let default_key = format!("default:{}", trust_level.as_str());
    if let Some(row) = fetch_enabled_policy(tx, &default_key).await? {
        return Ok((
            default_key,
            TrustPolicy {
                auto_publish: row.auto_publish,
                requires_moderation: row.requires_moderation,
                rules_json: row.rules_json,
            },
        ));
    }

    Ok((default_key, default_policy(trust_level)))
}

async fn fetch_enabled_policy(
    tx: &mut Transaction<'_, Postgres>,
    source_key: &str,
) -> RepoResult<Option<SourceTrustPolicyRow>> {
    let row = sqlx::query_as::<_, SourceTrustPolicyRow>(
        "SELECT * FROM source_trust_policy WHERE source_key = $1 AND enabled",
    )
    .bind(source_key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(RepoError::from)?;
    Ok(row)
}

//! Loads the enabled `url_normalization_overrides` rows and assembles the
//! pure `OverrideSet` the domain canonicalizer consumes. Queried fresh
//! inside the caller's transaction so operator edits apply immediately to
//! any in-flight ingest/claim (§4.1).

use ingestplane_domain::url_canon::{HostOverride, OverrideSet};
use sqlx::{Postgres, Transaction};
use std::collections::BTreeSet;

use crate::models::UrlOverrideRow;

pub async fn load_override_set(tx: &mut Transaction<'_, Postgres>) -> anyhow::Result<OverrideSet> {
    let rows = sqlx::query_as::<_, UrlOverrideRow>(
        r#"
        SELECT host_suffix, strip_www, force_https, strip_query_params, strip_query_prefixes, enabled
        FROM url_normalization_overrides
        WHERE enabled
        "#,
    )
    .fetch_all(&mut **tx)
    .await?;

    let overrides = rows
        .into_iter()
        .map(|row| HostOverride {
            host_suffix: row.host_suffix,
            strip_www: row.strip_www,
            force_https: row.force_https,
            strip_query_params: json_string_set(&row.strip_query_params),
            strip_query_prefixes: json_string_list(&row.strip_query_prefixes),
        })
        .collect();

    Ok(OverrideSet { overrides })
}

fn json_string_set(value: &serde_json::Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str()).map(str::to_lowercase).collect())
        .unwrap_or_default()
}

fn json_string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str()).map(str::to_lowercase).collect())
        .unwrap_or_default()
}

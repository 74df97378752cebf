//! Core types for the provenance log. Append-only; never updated or deleted.

use chrono::{DateTime, Utc};
use ingestplane_common::ActorType;
use serde::{Deserialize, Serialize};

/// A provenance event as stored in Postgres. Returned by every read method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEvent {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: Option<uuid::Uuid>,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An event to be appended. The caller builds this; the store assigns `id`
/// and `created_at`.
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub entity_type: String,
    pub entity_id: Option<uuid::Uuid>,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub payload: serde_json::Value,
}

impl AppendEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: uuid::Uuid,
        event_type: impl Into<String>,
        actor_type: ActorType,
        actor_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: Some(entity_id),
            event_type: event_type.into(),
            actor_type,
            actor_id,
            payload,
        }
    }
}

//! Machine and human principal extraction (§6). Grounded on
//! `original_source/api/app/core/security.py` and on `rootsignal-api/src/
//! auth.rs`'s constant-time comparison idiom, generalized from a single
//! session cookie to the two-sided machine/human model this system needs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use ingestplane_common::{role_scopes, Principal, RepoError};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

pub struct MachinePrincipal(pub Principal);
pub struct HumanPrincipal(pub Principal);

/// Accepts either a machine or a human principal (§6's "machine or admin"
/// routes) — tries machine headers first, then falls back to the bearer
/// token.
pub struct AnyPrincipal(pub Principal);

impl FromRequestParts<Arc<AppState>> for AnyPrincipal {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if header_str(parts, "x-module-id").is_some() {
            let MachinePrincipal(principal) = MachinePrincipal::from_request_parts(parts, state).await?;
            return Ok(AnyPrincipal(principal));
        }
        let HumanPrincipal(principal) = HumanPrincipal::from_request_parts(parts, state).await?;
        Ok(AnyPrincipal(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for MachinePrincipal {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let module_id = header_str(parts, "x-module-id").ok_or_else(|| unauthorized("missing X-Module-Id"))?;
        let api_key = header_str(parts, "x-api-key").ok_or_else(|| unauthorized("missing X-API-Key"))?;

        let module = ingestplane_repo::queries::find_module_by_module_id(state.repo.pool(), module_id)
            .await
            .map_err(ApiError::from)
            .map_err(IntoResponse::into_response)?
            .ok_or_else(|| unauthorized("unknown module"))?;

        let candidate_hash = hex::encode(Sha256::digest(api_key.as_bytes()));
        let hashes = ingestplane_repo::queries::find_enabled_credential_hashes(state.repo.pool(), module.id)
            .await
            .map_err(ApiError::from)
            .map_err(IntoResponse::into_response)?;

        let matched = hashes.iter().any(|stored| constant_time_eq(stored.as_bytes(), candidate_hash.as_bytes()));
        if !matched {
            return Err(unauthorized("invalid API key"));
        }

        Ok(MachinePrincipal(Principal::Machine {
            module_id: module.module_id,
            module_db_id: module.id,
            scopes: module.scope_list(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct IdentityUser {
    id: String,
    #[serde(default)]
    app_metadata: serde_json::Value,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl FromRequestParts<Arc<AppState>> for HumanPrincipal {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = header_str(parts, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| unauthorized("missing bearer token"))?;

        if state.config.identity_provider_url.is_empty() {
            return Err(ApiError::from(RepoError::unavailable("identity provider not configured")).into_response());
        }

        let response = state
            .http
            .get(format!("{}/user", state.config.identity_provider_url))
            .bearer_auth(token)
            .header("apikey", &state.config.identity_provider_anon_key)
            .timeout(Duration::from_secs(state.config.auth_timeout_seconds))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(_) => {
                return Err(ApiError::from(RepoError::unavailable("identity provider unreachable")).into_response())
            }
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(unauthorized("identity provider rejected token"));
        }
        if !response.status().is_success() {
            return Err(ApiError::from(RepoError::unavailable("identity provider error")).into_response());
        }

        let user: IdentityUser = response
            .json()
            .await
            .map_err(|_| ApiError::from(RepoError::unavailable("identity provider returned malformed body")).into_response())?;

        let role = user
            .app_metadata
            .get("role")
            .and_then(|v| v.as_str())
            .or_else(|| user.user_metadata.get("role").and_then(|v| v.as_str()))
            .unwrap_or("user")
            .to_string();

        let scopes = role_scopes(&role);
        Ok(HumanPrincipal(Principal::Human { user_id: user.id, role, scopes }))
    }
}

/// Total scope check shared by every handler that needs one. Returns
/// `Forbidden`, never panics, on a missing scope.
pub fn require_scopes(principal: &Principal, required: &[&str]) -> Result<(), ApiError> {
    if principal.has_scopes(required) {
        Ok(())
    } else {
        Err(ApiError::from(RepoError::forbidden(format!("missing required scope(s): {}", required.join(", ")))))
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name)?.to_str().ok()
}

fn unauthorized(msg: &str) -> Response {
    ApiError::from(RepoError::unauthorized(msg)).into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

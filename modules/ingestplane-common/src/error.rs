use thiserror::Error;

/// The error taxonomy every core operation propagates. HTTP binding maps
/// each kind 1:1 to a status code; see `ingestplane-api`.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RepoError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Short machine-readable tag for the error kind, used in logs and in
    /// the JSON error body's `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

/// A transient database error (pool exhaustion, connection refused, timeout)
/// surfaces as `Unavailable`, never bubbling up as some other kind. Callers
/// that want to distinguish "no such row" should query explicitly and
/// return `RepoError::NotFound`, not rely on a database driver error.
impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::Unavailable(format!("database unavailable: {err}"))
            }
            other => Self::Internal(other.into()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

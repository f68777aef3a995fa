pub mod booking;
pub mod events;
pub mod location;
pub mod otp;
pub mod payment;
pub mod rate_limit;
pub mod repository;
pub mod trip;

use repository::RepoError;

/// Client-facing failure taxonomy of the booking core. Every variant except
/// `InternalError` carries a message that is safe to show to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("{0}")]
    Expired(String),
    #[error("{0}")]
    AuthenticationMismatch(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Conflict(_) => "conflict",
            CoreError::ValidationError(_) => "validation_error",
            CoreError::Expired(_) => "expired",
            CoreError::AuthenticationMismatch(_) => "authentication_mismatch",
            CoreError::RateLimited(_) => "rate_limited",
            CoreError::InternalError(_) => "internal",
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        CoreError::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::ValidationError(msg.into())
    }
}

impl From<RepoError> for CoreError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate(msg) => CoreError::Conflict(msg),
            other => CoreError::InternalError(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

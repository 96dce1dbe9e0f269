use std::fmt;

use thiserror::Error;

/// Failure reported by a backing store (rate windows or API keys).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("record conflict: {0}")]
    Conflict(String),
    #[error("stored record could not be decoded: {0}")]
    Corrupt(String),
}

/// Stable, client-visible classification of an admission rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationFailure,
    AuthorizationFailure,
    RateLimitExceeded,
    BackingStoreUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::AuthorizationFailure => "authorization_failure",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::BackingStoreUnavailable => "backing_store_unavailable",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            Self::AuthenticationFailure => 401,
            Self::AuthorizationFailure => 403,
            Self::RateLimitExceeded => 429,
            Self::BackingStoreUnavailable => 503,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication failed: {reason}")]
    AuthenticationFailure { reason: String },
    #[error("missing required scope `{required}`")]
    AuthorizationFailure { required: String },
    #[error("rate limit exceeded for `{limit_type}`, retry after {retry_after_secs}s")]
    RateLimitExceeded { limit_type: String, limit: u32, reset_at: i64, retry_after_secs: u64 },
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(String),
}

impl AuthError {
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailure { reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationFailure { .. } => ErrorKind::AuthenticationFailure,
            Self::AuthorizationFailure { .. } => ErrorKind::AuthorizationFailure,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::BackingStoreUnavailable(_) => ErrorKind::BackingStoreUnavailable,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Text safe to return to callers; never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure { .. } => "Invalid or missing credentials.",
            Self::AuthorizationFailure { .. } => {
                "The credential does not grant access to this operation."
            }
            Self::RateLimitExceeded { .. } => "Rate limit exceeded. Retry after the reset time.",
            Self::BackingStoreUnavailable(_) => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        Self::BackingStoreUnavailable(value.to_string())
    }
}

//! HTTP edge of the admission pipeline: bearer extraction, rejection bodies
//! and rate-limit response headers.

use axum::http::header::{AUTHORIZATION, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bridgeway_core::{Admitted, ApiKeyError, AuthError, RateLimitDecision, StoreError};
use serde_json::json;

use crate::state::AppState;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(String),
    NotFound(String),
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self::Auth(AuthError::from(value))
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(value: ApiKeyError) -> Self {
        match value {
            ApiKeyError::InvalidRequest(message) => Self::BadRequest(message),
            ApiKeyError::ScopeNotGrantable(scope) => {
                Self::Auth(AuthError::AuthorizationFailure { required: scope })
            }
            ApiKeyError::Store(error) => Self::from(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(error) => rejection_response(&error),
            Self::BadRequest(message) => {
                error_body(StatusCode::BAD_REQUEST, "invalid_request", &message)
            }
            Self::NotFound(message) => error_body(StatusCode::NOT_FOUND, "not_found", &message),
        }
    }
}

fn error_body(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

pub fn rejection_response(error: &AuthError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = error_body(status, error.kind().as_str(), error.user_message());

    if let AuthError::RateLimitExceeded { limit, reset_at, retry_after_secs, .. } = error {
        let headers = response.headers_mut();
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(*limit));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0_u32));
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(*reset_at));
        headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
    response
}

pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_at_unix()));
    headers
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Runs the API-key admission stages for one request.
pub async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    required_scope: &str,
) -> Result<Admitted, ApiError> {
    Ok(state.gateway.authorize_request(bearer_token(headers), required_scope).await?)
}

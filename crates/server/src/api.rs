use std::net::SocketAddr;
use std::str::FromStr;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bridgeway_core::auth::scopes::{with_role_scopes, SCOPE_API_MANAGE, SCOPE_WORKFLOWS_EXECUTE};
use bridgeway_core::{
    ApiKeyMetadata, KeyId, LimitType, NewApiKey, RateLimit, RateLimitDecision, Role,
};
use bridgeway_events::{TaskCounts, TaskRecord};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{admit, rate_limit_headers, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Adds the role's scope set to `scopes`.
    pub role: Option<Role>,
    pub quota_per_hour: Option<u32>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub key_id: String,
    /// Shown exactly once.
    pub secret: String,
    pub metadata: ApiKeyMetadata,
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<ApiKeyMetadata>,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub key_id: String,
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub limit_type: LimitType,
    pub identifier: String,
    pub cleared: bool,
}

#[derive(Debug, Deserialize)]
pub struct CustomLimitRequest {
    pub requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct CustomLimitResponse {
    pub limit_type: LimitType,
    pub identifier: String,
    pub limit: Option<RateLimit>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub rate_limiting: bool,
    pub tasks: TaskCounts,
}

pub async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateKeyRequest>,
) -> Result<(StatusCode, HeaderMap, Json<CreateKeyResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;

    let new_key = NewApiKey {
        name: request.name,
        scopes: with_role_scopes(request.scopes, request.role),
        quota_per_hour: request.quota_per_hour,
        expires_in_days: request.expires_in_days,
    };
    let created = state.gateway.keys().create_for(&admitted.key, new_key).await?;

    info!(
        event_name = "api.keys.created",
        key_id = %created.key_id,
        created_by = %admitted.key.key_id,
        "api key created"
    );
    Ok((
        StatusCode::CREATED,
        rate_limit_headers(&admitted.rate_limit),
        Json(CreateKeyResponse {
            key_id: created.key_id.to_string(),
            secret: created.secret.expose_secret().to_string(),
            metadata: created.metadata,
        }),
    ))
}

pub async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<KeyListResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let keys = state.gateway.keys().list().await?;
    Ok((rate_limit_headers(&admitted.rate_limit), Json(KeyListResponse { keys })))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<(HeaderMap, Json<RevokeResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let key_id = KeyId(key_id);
    if !state.gateway.keys().revoke(&key_id).await? {
        return Err(ApiError::NotFound(format!("API key {key_id} not found")));
    }

    info!(
        event_name = "api.keys.revoked",
        key_id = %key_id,
        revoked_by = %admitted.key.key_id,
        "api key revoked"
    );
    Ok((
        rate_limit_headers(&admitted.rate_limit),
        Json(RevokeResponse { key_id: key_id.to_string(), revoked: true }),
    ))
}

fn parse_limit_type(raw: &str) -> Result<LimitType, ApiError> {
    LimitType::from_str(raw).map_err(|error| ApiError::BadRequest(error.to_string()))
}

pub async fn rate_limit_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((limit_type, identifier)): Path<(String, String)>,
) -> Result<(HeaderMap, Json<RateLimitDecision>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let limit_type = parse_limit_type(&limit_type)?;
    let status = state.gateway.limiter().status(&identifier, limit_type).await;
    Ok((rate_limit_headers(&admitted.rate_limit), Json(status)))
}

pub async fn reset_rate_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((limit_type, identifier)): Path<(String, String)>,
) -> Result<(HeaderMap, Json<ResetResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let limit_type = parse_limit_type(&limit_type)?;
    let cleared = state.gateway.limiter().reset(&identifier, limit_type).await?;

    info!(
        event_name = "api.rate_limit.reset",
        limit_type = limit_type.as_str(),
        identifier = %identifier,
        reset_by = %admitted.key.key_id,
        "rate limit window reset"
    );
    Ok((
        rate_limit_headers(&admitted.rate_limit),
        Json(ResetResponse { limit_type, identifier, cleared }),
    ))
}

/// Overrides the default limit for one identifier. Held in memory by this process.
pub async fn set_custom_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((limit_type, identifier)): Path<(String, String)>,
    Json(request): Json<CustomLimitRequest>,
) -> Result<(HeaderMap, Json<CustomLimitResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let limit_type = parse_limit_type(&limit_type)?;
    if request.requests == 0 || request.window_secs == 0 {
        return Err(ApiError::BadRequest(
            "requests and window_secs must be greater than zero".to_string(),
        ));
    }

    let limit = RateLimit::new(request.requests, request.window_secs);
    state.gateway.limiter().set_custom_limit(identifier.as_str(), limit_type, limit).await;
    info!(
        event_name = "api.rate_limit.custom_set",
        limit_type = limit_type.as_str(),
        identifier = %identifier,
        requests = limit.requests,
        window_secs = limit.window_secs,
        set_by = %admitted.key.key_id,
        "custom rate limit set"
    );
    Ok((
        rate_limit_headers(&admitted.rate_limit),
        Json(CustomLimitResponse { limit_type, identifier, limit: Some(limit) }),
    ))
}

pub async fn clear_custom_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((limit_type, identifier)): Path<(String, String)>,
) -> Result<(HeaderMap, Json<CustomLimitResponse>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_API_MANAGE).await?;
    let limit_type = parse_limit_type(&limit_type)?;
    if !state.gateway.limiter().clear_custom_limit(&identifier, limit_type).await {
        return Err(ApiError::NotFound(format!("no custom {limit_type} limit for {identifier}")));
    }

    info!(
        event_name = "api.rate_limit.custom_cleared",
        limit_type = limit_type.as_str(),
        identifier = %identifier,
        cleared_by = %admitted.key.key_id,
        "custom rate limit cleared"
    );
    Ok((
        rate_limit_headers(&admitted.rate_limit),
        Json(CustomLimitResponse { limit_type, identifier, limit: None }),
    ))
}

pub async fn task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<(HeaderMap, Json<TaskRecord>), ApiError> {
    let admitted = admit(&state, &headers, SCOPE_WORKFLOWS_EXECUTE).await?;
    let record = state
        .background
        .registry()
        .get(&task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;
    Ok((rate_limit_headers(&admitted.rate_limit), Json(record)))
}

/// Public, so throttled per client address under the `ip` limit.
pub async fn service_status(
    State(state): State<AppState>,
    request: Request,
) -> Result<(HeaderMap, Json<StatusResponse>), ApiError> {
    let client = client_ip(&request);
    let decision = state.gateway.throttle(&client, LimitType::Ip).await?;

    Ok((
        rate_limit_headers(&decision),
        Json(StatusResponse {
            status: "active",
            service: "bridgeway",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: (Utc::now() - state.started_at).num_seconds(),
            rate_limiting: state.gateway.limiter().is_enabled(),
            tasks: state.background.registry().counts().await,
        }),
    ))
}

/// Peer address of the connection; forwarding headers are client-controlled and ignored.
fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(address)| address.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

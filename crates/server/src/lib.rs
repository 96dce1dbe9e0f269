pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod health;
pub mod load;
pub mod state;
pub mod webhooks;

use axum::routing::{delete, get, post, put};
use axum::Router;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhook/notion", post(webhooks::notion_webhook))
        .route("/webhook/slack/events", post(webhooks::slack_events))
        .route("/webhook/slack/commands", post(webhooks::slack_commands))
        .route("/api/v1/status", get(api::service_status))
        .route("/api/v1/keys", post(api::create_key).get(api::list_keys))
        .route("/api/v1/keys/{key_id}", delete(api::revoke_key))
        .route(
            "/api/v1/rate-limits/{limit_type}/{identifier}",
            get(api::rate_limit_status).delete(api::reset_rate_limit).put(api::set_custom_limit),
        )
        .route(
            "/api/v1/rate-limits/{limit_type}/{identifier}/limit",
            delete(api::clear_custom_limit),
        )
        .route("/api/v1/tasks/{task_id}", get(api::task_status))
        .with_state(state)
}

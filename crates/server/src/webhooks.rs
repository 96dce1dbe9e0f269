use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bridgeway_core::signature::{
    NOTION_SIGNATURE_HEADER, SLACK_SIGNATURE_HEADER, SLACK_TIMESTAMP_HEADER,
};
use bridgeway_core::{LimitType, WebhookSignature, WebhookSource};
use bridgeway_events::{
    parse_notion_payload, parse_slack_payload, parse_slash_command, CommandError, EventContext,
    SlackCallback, SlashCommandPayload, WebhookEnvelope, WebhookEvent,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::ApiError;
use crate::state::AppState;

const COMMAND_ACK: &str = "Processing your request...";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
}

fn verify_slack(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let timestamp = headers.get(SLACK_TIMESTAMP_HEADER).and_then(|value| value.to_str().ok());
    state.gateway.authorize_webhook(
        WebhookSource::Slack,
        WebhookSignature { body, signature: header(headers, SLACK_SIGNATURE_HEADER), timestamp },
    )?;
    Ok(())
}

async fn enqueue(state: &AppState, source: WebhookSource, event: WebhookEvent) -> String {
    let envelope = WebhookEnvelope::new(source, event);
    let ctx = EventContext::new(envelope.delivery_id.clone());
    let event_type = envelope.event.event_type();
    let task_id = state.background.submit(envelope, ctx).await;
    info!(
        event_name = "webhook.accepted",
        source = source.as_str(),
        event_type = event_type.as_str(),
        task_id = %task_id,
        "webhook accepted for background processing"
    );
    task_id
}

fn invalid_payload(source: WebhookSource, error: impl std::fmt::Display) -> ApiError {
    warn!(
        event_name = "webhook.invalid_payload",
        source = source.as_str(),
        error = %error,
        "rejecting malformed webhook payload"
    );
    ApiError::BadRequest("Invalid JSON".to_string())
}

pub async fn notion_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    state.gateway.authorize_webhook(
        WebhookSource::Notion,
        WebhookSignature {
            body: &body,
            signature: header(&headers, NOTION_SIGNATURE_HEADER),
            timestamp: None,
        },
    )?;
    state.gateway.throttle(WebhookSource::Notion.as_str(), LimitType::Webhook).await?;

    let event = parse_notion_payload(&body)
        .map_err(|error| invalid_payload(WebhookSource::Notion, error))?;
    let task_id = enqueue(&state, WebhookSource::Notion, event).await;
    Ok(Json(json!({ "status": "received", "task_id": task_id })))
}

pub async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_slack(&state, &headers, &body)?;
    state.gateway.throttle(WebhookSource::Slack.as_str(), LimitType::Webhook).await?;

    let callback =
        parse_slack_payload(&body).map_err(|error| invalid_payload(WebhookSource::Slack, error))?;
    match callback {
        SlackCallback::UrlVerification { challenge } => Ok(Json(json!({ "challenge": challenge }))),
        SlackCallback::Event(event) => {
            let task_id = enqueue(&state, WebhookSource::Slack, event).await;
            Ok(Json(json!({ "status": "received", "task_id": task_id })))
        }
    }
}

pub async fn slack_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_slack(&state, &headers, &body)?;

    let payload = SlashCommandPayload::from_form(url::form_urlencoded::parse(&body))
        .map_err(|error| ApiError::BadRequest(error.to_string()))?;
    state.gateway.throttle(&payload.user_id, LimitType::SlackCommand).await?;

    let command = match parse_slash_command(payload) {
        Ok(command) => command,
        Err(error @ (CommandError::Usage { .. } | CommandError::Unsupported(_))) => {
            return Ok(Json(ephemeral(&error.to_string())));
        }
        Err(error @ CommandError::MissingField(_)) => {
            return Err(ApiError::BadRequest(error.to_string()));
        }
    };

    enqueue(&state, WebhookSource::Slack, WebhookEvent::SlashCommand(command)).await;
    Ok(Json(ephemeral(COMMAND_ACK)))
}

fn ephemeral(text: &str) -> Value {
    json!({ "response_type": "ephemeral", "text": text })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::router;
    use crate::test_support::{slack_signature, test_state, NOTION_SECRET, SLACK_SECRET};

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn slack_request(uri: &str, content_type: &str, body: &str) -> Request<Body> {
        let timestamp = Utc::now().timestamp().to_string();
        Request::post(uri)
            .header("content-type", content_type)
            .header("X-Slack-Request-Timestamp", &timestamp)
            .header("X-Slack-Signature", slack_signature(SLACK_SECRET, &timestamp, body))
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    #[tokio::test]
    async fn notion_webhook_rejects_invalid_signature() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::post("/webhook/notion")
                    .header("Notion-Webhook-Signature", "invalid")
                    .body(Body::from(r#"{"type":"page.created"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "authentication_failure");
    }

    #[tokio::test]
    async fn notion_webhook_accepts_signed_payload() {
        let body = r#"{"type":"page.updated","data":{"id":"page-1"}}"#;
        let signature = bridgeway_core::signature::sign_hex(NOTION_SECRET, body.as_bytes())
            .expect("signature");
        let app = router(test_state().await);

        let response = app
            .oneshot(
                Request::post("/webhook/notion")
                    .header("Notion-Webhook-Signature", signature)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        assert_eq!(payload["status"], "received");
        assert!(payload["task_id"].is_string());
    }

    #[tokio::test]
    async fn slack_url_verification_echoes_challenge() {
        let app = router(test_state().await);
        let response = app
            .oneshot(slack_request(
                "/webhook/slack/events",
                "application/json",
                r#"{"type":"url_verification","challenge":"test_challenge"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["challenge"], "test_challenge");
    }

    #[tokio::test]
    async fn slack_events_reject_stale_timestamps() {
        let body = r#"{"type":"url_verification","challenge":"c"}"#;
        let stale = (Utc::now().timestamp() - 301).to_string();
        let app = router(test_state().await);

        let response = app
            .oneshot(
                Request::post("/webhook/slack/events")
                    .header("X-Slack-Request-Timestamp", &stale)
                    .header("X-Slack-Signature", slack_signature(SLACK_SECRET, &stale, body))
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn slash_commands_acknowledge_or_return_usage() {
        let state = test_state().await;
        let form = "command=%2Ftask&text=Create+a+new+task&user_id=U1234567890&channel_id=C1\
                    &response_url=https%3A%2F%2Fhooks.slack.test%2F1";
        let response = router(state.clone())
            .oneshot(slack_request(
                "/webhook/slack/commands",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        assert_eq!(payload["response_type"], "ephemeral");
        assert_eq!(payload["text"], "Processing your request...");
        let counts = state.background.registry().counts().await;
        assert_eq!(counts.pending + counts.running + counts.succeeded + counts.failed, 1);

        let usage = router(state)
            .oneshot(slack_request(
                "/webhook/slack/commands",
                "application/x-www-form-urlencoded",
                "command=%2Fquery&text=&user_id=U1234567890&channel_id=C1",
            ))
            .await
            .expect("response");
        let payload = json_body(usage).await;
        assert!(payload["text"].as_str().unwrap_or_default().contains("Usage: `/query"));
    }

    #[tokio::test]
    async fn slash_commands_are_rate_limited_per_user() {
        let state = test_state().await;
        let form = "command=%2Fsync&text=&user_id=U42&channel_id=C1";

        for _ in 0..10 {
            let response = router(state.clone())
                .oneshot(slack_request(
                    "/webhook/slack/commands",
                    "application/x-www-form-urlencoded",
                    form,
                ))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let limited = router(state)
            .oneshot(slack_request(
                "/webhook/slack/commands",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .expect("response");
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().contains_key("retry-after"));
    }
}

//! A signed Slack mention travels through the router, the background
//! dispatcher and back out through the task status API.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use bridgeway_core::config::{ConfigOverrides, LoadOptions};
use bridgeway_core::signature::slack_signature;
use bridgeway_core::NewApiKey;
use bridgeway_server::{bootstrap::bootstrap, router};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const SIGNING_SECRET: &str = "integration-signing-secret";

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn mention_is_processed_in_background_and_visible_via_task_api() {
    let dir = TempDir::new().expect("tempdir");
    let app = bootstrap(LoadOptions {
        overrides: ConfigOverrides {
            database_url: Some(format!("sqlite://{}", dir.path().join("flow.db").display())),
            slack_signing_secret: Some(SIGNING_SECRET.to_owned()),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    })
    .await
    .expect("bootstrap");

    let body = serde_json::json!({
        "type": "event_callback",
        "event": {
            "type": "app_mention",
            "user": "U1",
            "text": "<@B1> summarize",
            "channel": "C1",
            "ts": "1700000000.1"
        }
    })
    .to_string();
    let timestamp = Utc::now().timestamp().to_string();
    let signature =
        slack_signature(SIGNING_SECRET, &timestamp, body.as_bytes()).expect("signature");

    let accepted = router(app.state.clone())
        .oneshot(
            Request::post("/webhook/slack/events")
                .header("X-Slack-Request-Timestamp", &timestamp)
                .header("X-Slack-Signature", signature)
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(accepted.status(), StatusCode::OK);
    let task_id = json_body(accepted).await["task_id"].as_str().expect("task id").to_owned();

    let worker = app
        .state
        .gateway
        .keys()
        .create(NewApiKey {
            name: "worker".to_owned(),
            scopes: vec!["workflows:execute".to_owned()],
            quota_per_hour: None,
            expires_in_days: None,
        })
        .await
        .expect("create key");

    let mut state = Value::Null;
    for _ in 0..50 {
        let response = router(app.state.clone())
            .oneshot(
                Request::get(format!("/api/v1/tasks/{task_id}"))
                    .header("authorization", format!("Bearer {}", worker.secret.expose_secret()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let record = json_body(response).await;
        state = record["state"].clone();
        if state == "succeeded" {
            assert_eq!(record["outcome"], "responded");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(state, "succeeded");
    app.db_pool.close().await;
}

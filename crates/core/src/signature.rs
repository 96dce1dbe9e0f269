//! Inbound webhook signature verification for Notion and Slack.
//!
//! Every verifier fails closed: any malformed input yields `false`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const NOTION_SIGNATURE_HEADER: &str = "Notion-Webhook-Signature";
pub const SLACK_SIGNATURE_HEADER: &str = "X-Slack-Signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";

/// Default replay window for Slack requests, in seconds.
pub const SLACK_REPLAY_WINDOW_SECS: i64 = 300;

const SLACK_VERSION: &str = "v0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookSource {
    Notion,
    Slack,
}

impl WebhookSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notion => "notion",
            Self::Slack => "slack",
        }
    }
}

/// Ephemeral bundle of everything needed to check one inbound request.
#[derive(Clone, Copy, Debug)]
pub struct WebhookSignature<'a> {
    pub body: &'a [u8],
    pub signature: &'a str,
    pub timestamp: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    replay_window_secs: i64,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self { replay_window_secs: SLACK_REPLAY_WINDOW_SECS }
    }
}

impl SignatureVerifier {
    pub fn new(replay_window_secs: i64) -> Self {
        Self { replay_window_secs }
    }

    pub fn replay_window_secs(&self) -> i64 {
        self.replay_window_secs
    }

    pub fn verify(
        &self,
        source: WebhookSource,
        request: WebhookSignature<'_>,
        secret: &str,
    ) -> bool {
        self.verify_at(source, request, secret, Utc::now())
    }

    pub fn verify_at(
        &self,
        source: WebhookSource,
        request: WebhookSignature<'_>,
        secret: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match source {
            WebhookSource::Notion => verify_notion(request.body, secret, request.signature),
            WebhookSource::Slack => match request.timestamp {
                Some(timestamp) => self.verify_slack_at(
                    request.body,
                    secret,
                    request.signature,
                    timestamp,
                    now,
                ),
                None => {
                    debug!(event_name = "signature.slack.missing_timestamp", "rejecting request");
                    false
                }
            },
        }
    }

    /// Checks the replay window before doing any HMAC work.
    pub fn verify_slack_at(
        &self,
        body: &[u8],
        secret: &str,
        signature: &str,
        timestamp: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Ok(claimed) = timestamp.trim().parse::<i64>() else {
            debug!(event_name = "signature.slack.bad_timestamp", "rejecting request");
            return false;
        };

        let skew = now.timestamp().saturating_sub(claimed).saturating_abs();
        if skew > self.replay_window_secs {
            debug!(
                event_name = "signature.slack.stale",
                skew_secs = skew,
                window_secs = self.replay_window_secs,
                "rejecting request outside replay window"
            );
            return false;
        }

        let Some(claimed_hex) = signature.strip_prefix("v0=") else {
            return false;
        };

        let mut base = Vec::with_capacity(body.len() + timestamp.len() + 4);
        base.extend_from_slice(SLACK_VERSION.as_bytes());
        base.push(b':');
        base.extend_from_slice(timestamp.as_bytes());
        base.push(b':');
        base.extend_from_slice(body);

        hmac_matches(secret, &base, claimed_hex)
    }
}

pub fn verify_notion(body: &[u8], secret: &str, signature: &str) -> bool {
    hmac_matches(secret, body, signature)
}

pub fn verify_slack(body: &[u8], secret: &str, signature: &str, timestamp: &str) -> bool {
    SignatureVerifier::default().verify_slack_at(body, secret, signature, timestamp, Utc::now())
}

/// Lowercase hex HMAC-SHA256. Used by tests and the CLI to sign fixtures.
pub fn sign_hex(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn slack_signature(secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut base = format!("{SLACK_VERSION}:{timestamp}:").into_bytes();
    base.extend_from_slice(body);
    sign_hex(secret, &base).map(|digest| format!("{SLACK_VERSION}={digest}"))
}

fn hmac_matches(secret: &str, payload: &[u8], claimed_hex: &str) -> bool {
    if secret.is_empty() || claimed_hex.is_empty() {
        return false;
    }
    // Uppercase hex would decode to the same bytes; the wire format is lowercase only.
    if claimed_hex.bytes().any(|byte| byte.is_ascii_uppercase()) {
        return false;
    }
    let Ok(claimed) = hex::decode(claimed_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&claimed).is_ok()
}

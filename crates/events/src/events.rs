use bridgeway_core::signature::WebhookSource;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::commands::SlashCommand;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
}

/// A verified inbound delivery, ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookEnvelope {
    pub delivery_id: String,
    pub source: WebhookSource,
    pub received_at: DateTime<Utc>,
    pub event: WebhookEvent,
}

impl WebhookEnvelope {
    pub fn new(source: WebhookSource, event: WebhookEvent) -> Self {
        Self {
            delivery_id: Uuid::new_v4().to_string(),
            source,
            received_at: Utc::now(),
            event,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    NotionPageCreated(NotionObjectRef),
    NotionPageUpdated(NotionObjectRef),
    NotionDatabaseUpdated(NotionObjectRef),
    AppMention(SlackMessageEvent),
    DirectMessage(SlackMessageEvent),
    ReactionAdded(SlackReactionEvent),
    SlashCommand(SlashCommand),
    Unsupported { event_type: String },
}

impl WebhookEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::NotionPageCreated(_) => EventType::NotionPageCreated,
            Self::NotionPageUpdated(_) => EventType::NotionPageUpdated,
            Self::NotionDatabaseUpdated(_) => EventType::NotionDatabaseUpdated,
            Self::AppMention(_) => EventType::AppMention,
            Self::DirectMessage(_) => EventType::DirectMessage,
            Self::ReactionAdded(_) => EventType::ReactionAdded,
            Self::SlashCommand(_) => EventType::SlashCommand,
            Self::Unsupported { .. } => EventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    NotionPageCreated,
    NotionPageUpdated,
    NotionDatabaseUpdated,
    AppMention,
    DirectMessage,
    ReactionAdded,
    SlashCommand,
    Unsupported,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotionPageCreated => "page.created",
            Self::NotionPageUpdated => "page.updated",
            Self::NotionDatabaseUpdated => "database.updated",
            Self::AppMention => "app_mention",
            Self::DirectMessage => "message.im",
            Self::ReactionAdded => "reaction_added",
            Self::SlashCommand => "slash_command",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotionObjectRef {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackMessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackReactionEvent {
    pub user_id: String,
    pub reaction: String,
    pub item_channel: Option<String>,
    pub item_ts: Option<String>,
}

/// Outcome of parsing a Slack Events API body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackCallback {
    UrlVerification { challenge: String },
    Event(WebhookEvent),
}

#[derive(Debug, Deserialize)]
struct NotionPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: NotionData,
}

#[derive(Debug, Default, Deserialize)]
struct NotionData {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    challenge: Option<String>,
    event: Option<SlackInnerEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackInnerEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    channel_type: String,
    #[serde(default)]
    ts: String,
    thread_ts: Option<String>,
    subtype: Option<String>,
    bot_id: Option<String>,
    #[serde(default)]
    reaction: String,
    item: Option<SlackReactionItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackReactionItem {
    channel: Option<String>,
    ts: Option<String>,
}

pub fn parse_notion_payload(body: &[u8]) -> Result<WebhookEvent, EventParseError> {
    let payload: NotionPayload = serde_json::from_slice(body)
        .map_err(|error| EventParseError::InvalidJson(error.to_string()))?;
    let kind = payload.kind.ok_or(EventParseError::MissingField("type"))?;
    let object = NotionObjectRef { id: payload.data.id };

    Ok(match kind.as_str() {
        "page.created" => WebhookEvent::NotionPageCreated(object),
        "page.updated" => WebhookEvent::NotionPageUpdated(object),
        "database.updated" => WebhookEvent::NotionDatabaseUpdated(object),
        _ => WebhookEvent::Unsupported { event_type: kind },
    })
}

pub fn parse_slack_payload(body: &[u8]) -> Result<SlackCallback, EventParseError> {
    let payload: SlackPayload = serde_json::from_slice(body)
        .map_err(|error| EventParseError::InvalidJson(error.to_string()))?;

    if payload.kind.as_deref() == Some("url_verification") {
        let challenge = payload.challenge.ok_or(EventParseError::MissingField("challenge"))?;
        return Ok(SlackCallback::UrlVerification { challenge });
    }

    let event = payload.event.ok_or(EventParseError::MissingField("event"))?;
    Ok(SlackCallback::Event(classify_slack_event(event)))
}

fn classify_slack_event(event: SlackInnerEvent) -> WebhookEvent {
    match event.kind.as_str() {
        "app_mention" => WebhookEvent::AppMention(message_of(event)),
        // Only direct messages from people; bot echoes and edits are dropped.
        "message"
            if event.channel_type == "im" && event.subtype.is_none() && event.bot_id.is_none() =>
        {
            WebhookEvent::DirectMessage(message_of(event))
        }
        "reaction_added" => {
            let item = event.item.unwrap_or_default();
            WebhookEvent::ReactionAdded(SlackReactionEvent {
                user_id: event.user,
                reaction: event.reaction,
                item_channel: item.channel,
                item_ts: item.ts,
            })
        }
        _ => WebhookEvent::Unsupported { event_type: event.kind },
    }
}

fn message_of(event: SlackInnerEvent) -> SlackMessageEvent {
    SlackMessageEvent {
        channel_id: event.channel,
        user_id: event.user,
        text: event.text,
        ts: event.ts,
        thread_ts: event.thread_ts,
    }
}

//! Default handlers for verified webhook events.
//!
//! Handlers talk to the outside world only through the collaborator traits
//! below. Every outbound call spends from its API budget (`notion_api` or
//! `slack_api`) and goes through the configured [`RetryPolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use bridgeway_core::retry::RetryPolicy;
use bridgeway_core::{LimitType, RateLimiter};
use thiserror::Error;
use tracing::info;

use crate::commands::CommandKind;
use crate::dispatch::{
    EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
};
use crate::events::{EventType, WebhookEnvelope, WebhookEvent};

const MAX_QUERY_RESULTS: usize = 5;

/// Outbound budgets are shared per integration, not per caller.
pub const NOTION_API_BUDGET: &str = "notion";
pub const SLACK_API_BUDGET: &str = "slack";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// LLM-backed agent that turns a chat message into a reply.
#[async_trait]
pub trait AgentResponder: Send + Sync {
    async fn respond(&self, user_id: &str, text: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), CollaboratorError>;

    async fn respond_to_command(
        &self,
        response_url: &str,
        text: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait WorkspaceGateway: Send + Sync {
    async fn create_task(&self, description: &str) -> Result<String, CollaboratorError>;
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError>;
    async fn trigger_sync(&self, target: Option<&str>) -> Result<(), CollaboratorError>;
}

/// Acknowledges mentions without calling a model.
#[derive(Default)]
pub struct AcknowledgingAgent;

#[async_trait]
impl AgentResponder for AcknowledgingAgent {
    async fn respond(&self, _user_id: &str, _text: &str) -> Result<String, CollaboratorError> {
        Ok("I received your message! Let me process that for you.".to_owned())
    }
}

/// Records outbound messages in the log instead of delivering them.
#[derive(Default)]
pub struct LoggingChatPoster;

#[async_trait]
impl ChatPoster for LoggingChatPoster {
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        info!(
            event_name = "chat.post_message",
            channel_id,
            thread_ts = thread_ts.unwrap_or(""),
            length = text.len(),
            "chat message"
        );
        Ok(())
    }

    async fn respond_to_command(
        &self,
        _response_url: &str,
        text: &str,
    ) -> Result<(), CollaboratorError> {
        info!(event_name = "chat.command_response", length = text.len(), "command response");
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopWorkspace;

#[async_trait]
impl WorkspaceGateway for NoopWorkspace {
    async fn create_task(&self, description: &str) -> Result<String, CollaboratorError> {
        Ok(format!("Task created: {description}"))
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn trigger_sync(&self, _target: Option<&str>) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub agent: Arc<dyn AgentResponder>,
    pub chat: Arc<dyn ChatPoster>,
    pub workspace: Arc<dyn WorkspaceGateway>,
    pub retry: RetryPolicy,
    /// Per-user and outbound API budgets. `None` leaves calls unthrottled.
    pub limiter: Option<Arc<RateLimiter>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            agent: Arc::new(AcknowledgingAgent),
            chat: Arc::new(LoggingChatPoster),
            workspace: Arc::new(NoopWorkspace),
            retry: RetryPolicy::default(),
            limiter: None,
        }
    }
}

impl Collaborators {
    /// Spends one request from `identifier`'s budget; false when it is exhausted.
    pub async fn within_budget(&self, identifier: &str, limit_type: LimitType) -> bool {
        let Some(limiter) = &self.limiter else {
            return true;
        };
        let decision = limiter.check(identifier, limit_type).await;
        if !decision.allowed {
            info!(
                event_name = "events.budget.exhausted",
                limit_type = limit_type.as_str(),
                identifier,
                limit = decision.limit,
                "skipping call, budget exhausted"
            );
        }
        decision.allowed
    }
}

fn budget_exhausted(limit_type: LimitType) -> String {
    format!("{limit_type} budget exhausted")
}

pub struct NotionChangeHandler;

#[async_trait]
impl EventHandler for NotionChangeHandler {
    fn event_types(&self) -> &'static [EventType] {
        &[
            EventType::NotionPageCreated,
            EventType::NotionPageUpdated,
            EventType::NotionDatabaseUpdated,
        ]
    }

    async fn handle(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let object = match &envelope.event {
            WebhookEvent::NotionPageCreated(object)
            | WebhookEvent::NotionPageUpdated(object)
            | WebhookEvent::NotionDatabaseUpdated(object) => object,
            _ => return Ok(HandlerResult::Ignored),
        };

        info!(
            event_name = "events.notion.changed",
            correlation_id = %ctx.correlation_id,
            event_type = envelope.event.event_type().as_str(),
            object_id = %object.id,
            "notion object changed"
        );
        Ok(HandlerResult::Processed)
    }
}

pub struct MessageHandler {
    collaborators: Collaborators,
}

impl MessageHandler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    fn event_types(&self) -> &'static [EventType] {
        &[EventType::AppMention, EventType::DirectMessage]
    }

    async fn handle(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let message = match &envelope.event {
            WebhookEvent::AppMention(message) | WebhookEvent::DirectMessage(message) => message,
            _ => return Ok(HandlerResult::Ignored),
        };

        let collaborators = &self.collaborators;
        if !collaborators.within_budget(&message.user_id, LimitType::User).await {
            return Ok(HandlerResult::Ignored);
        }

        let Collaborators { agent, chat, retry, .. } = collaborators;
        let reply = retry
            .run("agent.respond", || agent.respond(&message.user_id, &message.text))
            .await
            .map_err(|error| EventHandlerError::Agent(error.to_string()))?;

        // Mentions are answered in a thread; direct messages inline.
        let thread_ts = match envelope.event {
            WebhookEvent::AppMention(_) => {
                Some(message.thread_ts.as_deref().unwrap_or(message.ts.as_str()))
            }
            _ => message.thread_ts.as_deref(),
        };
        if !collaborators.within_budget(SLACK_API_BUDGET, LimitType::SlackApi).await {
            return Err(EventHandlerError::Chat(budget_exhausted(LimitType::SlackApi)));
        }
        retry
            .run("chat.post_message", || chat.post_message(&message.channel_id, &reply, thread_ts))
            .await
            .map_err(|error| EventHandlerError::Chat(error.to_string()))?;

        info!(
            event_name = "events.slack.replied",
            correlation_id = %ctx.correlation_id,
            channel_id = %message.channel_id,
            "replied to message"
        );
        Ok(HandlerResult::Responded(reply))
    }
}

pub struct ReactionHandler;

#[async_trait]
impl EventHandler for ReactionHandler {
    fn event_types(&self) -> &'static [EventType] {
        &[EventType::ReactionAdded]
    }

    async fn handle(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let WebhookEvent::ReactionAdded(reaction) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "events.slack.reaction",
            correlation_id = %ctx.correlation_id,
            reaction = %reaction.reaction,
            user_id = %reaction.user_id,
            "reaction feedback"
        );
        Ok(HandlerResult::Processed)
    }
}

pub struct SlashCommandHandler {
    collaborators: Collaborators,
}

impl SlashCommandHandler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    async fn run_command(&self, kind: &CommandKind) -> String {
        let failure_reply = match kind {
            CommandKind::Task { .. } => "Sorry, I encountered an error creating the task.",
            CommandKind::Query { .. } => "Sorry, I encountered an error searching.",
            CommandKind::Sync { .. } => "Sorry, I encountered an error with synchronization.",
        };
        let collaborators = &self.collaborators;
        if !collaborators.within_budget(NOTION_API_BUDGET, LimitType::NotionApi).await {
            return failure_reply.to_owned();
        }

        let Collaborators { workspace, retry, .. } = collaborators;
        let outcome = match kind {
            CommandKind::Task { description } => retry
                .run("workspace.create_task", || workspace.create_task(description))
                .await,
            CommandKind::Query { query } => retry
                .run("workspace.search", || workspace.search(query))
                .await
                .map(|hits| format_search_results(query, &hits)),
            CommandKind::Sync { target } => retry
                .run("workspace.sync", || workspace.trigger_sync(target.as_deref()))
                .await
                .map(|()| {
                    "Synchronization triggered! I'll update the channel with any changes."
                        .to_owned()
                }),
        };
        outcome.unwrap_or_else(|_| failure_reply.to_owned())
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_types(&self) -> &'static [EventType] {
        &[EventType::SlashCommand]
    }

    async fn handle(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let WebhookEvent::SlashCommand(command) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "events.slack.command",
            correlation_id = %ctx.correlation_id,
            command = command.kind.name(),
            user_id = %command.user_id,
            "processing slash command"
        );

        let reply = self.run_command(&command.kind).await;
        let collaborators = &self.collaborators;
        if !collaborators.within_budget(SLACK_API_BUDGET, LimitType::SlackApi).await {
            return Err(EventHandlerError::Chat(budget_exhausted(LimitType::SlackApi)));
        }
        let Collaborators { chat, retry, .. } = collaborators;
        retry
            .run("chat.respond_to_command", || {
                chat.respond_to_command(&command.response_url, &reply)
            })
            .await
            .map_err(|error| EventHandlerError::Chat(error.to_string()))?;

        Ok(HandlerResult::Responded(reply))
    }
}

pub fn format_search_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for '{query}'");
    }

    let mut response = format!("Found {} results for '{query}':\n", hits.len());
    for hit in hits.iter().take(MAX_QUERY_RESULTS) {
        response.push_str(&format!("• <{}|{}>\n", hit.url, hit.title));
    }
    response
}

pub fn default_dispatcher(collaborators: Collaborators) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(NotionChangeHandler);
    dispatcher.register(MessageHandler::new(collaborators.clone()));
    dispatcher.register(ReactionHandler);
    dispatcher.register(SlashCommandHandler::new(collaborators));
    dispatcher
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bridgeway_core::retry::RetryPolicy;
    use bridgeway_core::signature::WebhookSource;
    use bridgeway_core::{InMemoryRateWindowStore, LimitType, RateLimit, RateLimiter};
    use tokio::sync::Mutex;

    use super::{
        default_dispatcher, format_search_results, AcknowledgingAgent, ChatPoster,
        CollaboratorError, Collaborators, NoopWorkspace, SearchHit, NOTION_API_BUDGET,
        SLACK_API_BUDGET,
    };
    use crate::commands::{CommandKind, SlashCommand};
    use crate::dispatch::{EventContext, EventHandlerError, HandlerResult};
    use crate::events::{SlackMessageEvent, WebhookEnvelope, WebhookEvent};

    #[derive(Default)]
    struct RecordingChat {
        posts: Mutex<Vec<(String, Option<String>)>>,
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl ChatPoster for RecordingChat {
        async fn post_message(
            &self,
            channel_id: &str,
            _text: &str,
            thread_ts: Option<&str>,
        ) -> Result<(), CollaboratorError> {
            if self
                .failures_before_success
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(CollaboratorError("slack 503".to_owned()));
            }
            self.posts.lock().await.push((channel_id.to_owned(), thread_ts.map(str::to_owned)));
            Ok(())
        }

        async fn respond_to_command(
            &self,
            response_url: &str,
            _text: &str,
        ) -> Result<(), CollaboratorError> {
            self.posts.lock().await.push((response_url.to_owned(), None));
            Ok(())
        }
    }

    fn collaborators(chat: Arc<RecordingChat>, attempts: u32) -> Collaborators {
        Collaborators {
            agent: Arc::new(AcknowledgingAgent),
            chat,
            workspace: Arc::new(NoopWorkspace),
            retry: RetryPolicy { max_attempts: attempts, base_delay_ms: 1, max_delay_ms: 1 },
            limiter: None,
        }
    }

    async fn limited(
        chat: Arc<RecordingChat>,
        identifier: &str,
        limit_type: LimitType,
    ) -> Collaborators {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateWindowStore::new()));
        limiter.set_custom_limit(identifier, limit_type, RateLimit::new(1, 60)).await;
        Collaborators { limiter: Some(Arc::new(limiter)), ..collaborators(chat, 1) }
    }

    fn roadmap_query() -> WebhookEnvelope {
        WebhookEnvelope::new(
            WebhookSource::Slack,
            WebhookEvent::SlashCommand(SlashCommand {
                kind: CommandKind::Query { query: "roadmap".to_owned() },
                user_id: "U1".to_owned(),
                channel_id: "C1".to_owned(),
                response_url: "https://hooks.slack.test/r/1".to_owned(),
            }),
        )
    }

    fn mention() -> WebhookEnvelope {
        WebhookEnvelope::new(
            WebhookSource::Slack,
            WebhookEvent::AppMention(SlackMessageEvent {
                channel_id: "C1".to_owned(),
                user_id: "U1".to_owned(),
                text: "<@B1> status?".to_owned(),
                ts: "171.5".to_owned(),
                thread_ts: None,
            }),
        )
    }

    #[tokio::test]
    async fn mention_reply_is_threaded_and_retried() {
        let chat = Arc::new(RecordingChat::default());
        chat.failures_before_success.store(1, Ordering::SeqCst);
        let dispatcher = default_dispatcher(collaborators(Arc::clone(&chat), 3));

        let result = dispatcher.dispatch(&mention(), &EventContext::new("req-1")).await;
        assert!(matches!(result, Ok(HandlerResult::Responded(_))));
        let posts = chat.posts.lock().await;
        assert_eq!(posts.as_slice(), &[("C1".to_owned(), Some("171.5".to_owned()))]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_handler_error() {
        let chat = Arc::new(RecordingChat::default());
        chat.failures_before_success.store(5, Ordering::SeqCst);
        let dispatcher = default_dispatcher(collaborators(Arc::clone(&chat), 2));

        let result = dispatcher.dispatch(&mention(), &EventContext::default()).await;
        assert_eq!(
            result.map_err(|error| error.to_string()),
            Err(EventHandlerError::Chat("slack 503".to_owned()).to_string())
        );
    }

    #[tokio::test]
    async fn slash_command_reply_goes_to_response_url() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = default_dispatcher(collaborators(Arc::clone(&chat), 1));

        let result = dispatcher.dispatch(&roadmap_query(), &EventContext::default()).await;
        assert_eq!(
            result,
            Ok(HandlerResult::Responded("No results found for 'roadmap'".to_owned()))
        );
        assert_eq!(chat.posts.lock().await[0].0, "https://hooks.slack.test/r/1");
    }

    #[tokio::test]
    async fn chatty_user_is_ignored_once_over_their_limit() {
        let chat = Arc::new(RecordingChat::default());
        let collaborators = limited(Arc::clone(&chat), "U1", LimitType::User).await;
        let dispatcher = default_dispatcher(collaborators);

        let first = dispatcher.dispatch(&mention(), &EventContext::default()).await;
        let second = dispatcher.dispatch(&mention(), &EventContext::default()).await;
        assert!(matches!(first, Ok(HandlerResult::Responded(_))));
        assert_eq!(second, Ok(HandlerResult::Ignored));
        assert_eq!(chat.posts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn slack_posts_stop_when_the_slack_budget_runs_out() {
        let chat = Arc::new(RecordingChat::default());
        let collaborators =
            limited(Arc::clone(&chat), SLACK_API_BUDGET, LimitType::SlackApi).await;
        let dispatcher = default_dispatcher(collaborators);

        dispatcher.dispatch(&mention(), &EventContext::default()).await.ok();
        let result = dispatcher.dispatch(&mention(), &EventContext::default()).await;
        assert_eq!(
            result.map_err(|error| error.to_string()),
            Err(EventHandlerError::Chat("slack_api budget exhausted".to_owned()).to_string())
        );
        assert_eq!(chat.posts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn workspace_calls_stop_when_the_notion_budget_runs_out() {
        let chat = Arc::new(RecordingChat::default());
        let collaborators =
            limited(Arc::clone(&chat), NOTION_API_BUDGET, LimitType::NotionApi).await;
        let dispatcher = default_dispatcher(collaborators);

        let first = dispatcher.dispatch(&roadmap_query(), &EventContext::default()).await;
        let second = dispatcher.dispatch(&roadmap_query(), &EventContext::default()).await;
        assert_eq!(
            first,
            Ok(HandlerResult::Responded("No results found for 'roadmap'".to_owned()))
        );
        assert_eq!(
            second,
            Ok(HandlerResult::Responded("Sorry, I encountered an error searching.".to_owned()))
        );
    }

    #[test]
    fn search_results_are_capped_at_five() {
        let hits: Vec<SearchHit> = (0..8)
            .map(|index| SearchHit {
                title: format!("Page {index}"),
                url: format!("https://notion.test/{index}"),
            })
            .collect();

        let rendered = format_search_results("plan", &hits);
        assert!(rendered.starts_with("Found 8 results for 'plan':"));
        assert_eq!(rendered.matches('•').count(), 5);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::events::{EventType, WebhookEnvelope};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

impl EventContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// A reply was posted back to the originating channel or response URL.
    Responded(String),
    Processed,
    Ignored,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("agent call failed: {0}")]
    Agent(String),
    #[error("chat delivery failed: {0}")]
    Chat(String),
    #[error("workspace call failed: {0}")]
    Workspace(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &'static [EventType];
    async fn handle(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for event_type in handler.event_types() {
            self.handlers.insert(*event_type, Arc::clone(&handler));
        }
    }

    pub async fn dispatch(
        &self,
        envelope: &WebhookEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let event_type = envelope.event.event_type();
        let Some(handler) = self.handlers.get(&event_type) else {
            debug!(
                event_name = "events.dispatch.unhandled",
                correlation_id = %ctx.correlation_id,
                event_type = event_type.as_str(),
                "no handler registered"
            );
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

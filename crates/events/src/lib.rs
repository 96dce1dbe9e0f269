pub mod commands;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod tasks;

pub use commands::{
    parse_slash_command, CommandError, CommandKind, SlashCommand, SlashCommandPayload,
};
pub use dispatch::{
    DispatchError, EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
};
pub use events::{
    parse_notion_payload, parse_slack_payload, EventParseError, EventType, SlackCallback,
    WebhookEnvelope, WebhookEvent,
};
pub use handlers::{
    default_dispatcher, AgentResponder, ChatPoster, CollaboratorError, Collaborators, SearchHit,
    WorkspaceGateway,
};
pub use tasks::{BackgroundDispatcher, TaskCounts, TaskRecord, TaskRegistry, TaskState};

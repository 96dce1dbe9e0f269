use thiserror::Error;

/// Form fields Slack sends with a slash command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    pub response_url: String,
    pub trigger_id: String,
}

impl SlashCommandPayload {
    pub fn from_form<I, K, V>(pairs: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut payload = Self::default();
        for (key, value) in pairs {
            match key.as_ref() {
                "command" => payload.command = value.into(),
                "text" => payload.text = value.into(),
                "user_id" => payload.user_id = value.into(),
                "channel_id" => payload.channel_id = value.into(),
                "response_url" => payload.response_url = value.into(),
                "trigger_id" => payload.trigger_id = value.into(),
                _ => {}
            }
        }

        if payload.command.is_empty() {
            return Err(CommandError::MissingField("command"));
        }
        if payload.user_id.is_empty() {
            return Err(CommandError::MissingField("user_id"));
        }
        Ok(payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Task { description: String },
    Query { query: String },
    Sync { target: Option<String> },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "/task",
            Self::Query { .. } => "/query",
            Self::Sync { .. } => "/sync",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommand {
    pub kind: CommandKind,
    pub user_id: String,
    pub channel_id: String,
    pub response_url: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("slash command is missing `{0}`")]
    MissingField(&'static str),
    #[error("{hint}")]
    Usage { command: &'static str, hint: &'static str },
    #[error("Unknown command: {0}")]
    Unsupported(String),
}

pub const TASK_USAGE: &str = "Please provide task details. Usage: `/task Create a new project`";
pub const QUERY_USAGE: &str = "Please provide a search query. Usage: `/query project status`";

pub fn parse_slash_command(payload: SlashCommandPayload) -> Result<SlashCommand, CommandError> {
    let text = payload.text.trim().to_string();
    let kind = match payload.command.trim() {
        "/task" if text.is_empty() => {
            return Err(CommandError::Usage { command: "/task", hint: TASK_USAGE })
        }
        "/task" => CommandKind::Task { description: text },
        "/query" if text.is_empty() => {
            return Err(CommandError::Usage { command: "/query", hint: QUERY_USAGE })
        }
        "/query" => CommandKind::Query { query: text },
        "/sync" => CommandKind::Sync { target: (!text.is_empty()).then_some(text) },
        other => return Err(CommandError::Unsupported(other.to_string())),
    };

    Ok(SlashCommand {
        kind,
        user_id: payload.user_id,
        channel_id: payload.channel_id,
        response_url: payload.response_url,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_slash_command, CommandError, CommandKind, SlashCommandPayload, TASK_USAGE};

    fn payload(command: &str, text: &str) -> SlashCommandPayload {
        SlashCommandPayload::from_form([
            ("command", command),
            ("text", text),
            ("user_id", "U123"),
            ("channel_id", "C9"),
            ("response_url", "https://hooks.slack.test/commands/1"),
        ])
        .expect("complete form")
    }

    #[test]
    fn task_query_and_sync_parse() {
        let task = parse_slash_command(payload("/task", "  Draft Q3 plan ")).expect("task");
        assert_eq!(task.kind, CommandKind::Task { description: "Draft Q3 plan".to_owned() });
        assert_eq!(task.user_id, "U123");

        let query = parse_slash_command(payload("/query", "roadmap")).expect("query");
        assert_eq!(query.kind, CommandKind::Query { query: "roadmap".to_owned() });

        let sync = parse_slash_command(payload("/sync", "")).expect("sync");
        assert_eq!(sync.kind, CommandKind::Sync { target: None });
    }

    #[test]
    fn empty_text_yields_usage_hint() {
        let error = parse_slash_command(payload("/task", "   ")).expect_err("usage");
        assert_eq!(error, CommandError::Usage { command: "/task", hint: TASK_USAGE });
        assert!(error.to_string().contains("Usage: `/task"));
    }

    #[test]
    fn unknown_commands_and_missing_fields_are_rejected() {
        assert_eq!(
            parse_slash_command(payload("/deploy", "prod")),
            Err(CommandError::Unsupported("/deploy".to_owned()))
        );
        assert_eq!(
            SlashCommandPayload::from_form([("text", "x")]),
            Err(CommandError::MissingField("command"))
        );
    }
}

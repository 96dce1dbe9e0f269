//! Background processing of accepted webhook deliveries.
//!
//! Webhook endpoints acknowledge immediately and hand the envelope to a
//! [`BackgroundDispatcher`]; progress is tracked in a [`TaskRegistry`] so the
//! status API can report it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::dispatch::{EventContext, EventDispatcher, HandlerResult};
use crate::events::WebhookEnvelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub event_type: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, event_type: &str) -> String {
        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord {
            task_id: task_id.clone(),
            event_type: event_type.to_owned(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            finished_at: None,
            outcome: None,
        };
        self.tasks.write().await.insert(task_id.clone(), record);
        task_id
    }

    pub async fn mark_running(&self, task_id: &str) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            record.state = TaskState::Running;
        }
    }

    pub async fn finish(&self, task_id: &str, state: TaskState, outcome: impl Into<String>) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            record.state = state;
            record.finished_at = Some(Utc::now());
            record.outcome = Some(outcome.into());
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Drops finished tasks older than `max_age`; returns how many were removed.
    pub async fn prune(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| {
            !(record.state.is_finished()
                && record.finished_at.is_some_and(|finished| finished < cutoff))
        });
        before - tasks.len()
    }

    pub async fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().await;
        let mut counts = TaskCounts::default();
        for record in tasks.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Succeeded => counts.succeeded += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

pub const PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);
/// How long finished tasks stay visible to the status API.
pub const TASK_RETENTION_SECS: i64 = 3600;

/// Periodically drops finished tasks older than `retention`.
pub fn spawn_pruner(
    registry: Arc<TaskRegistry>,
    interval: std::time::Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.prune(retention, Utc::now()).await;
            if removed > 0 {
                debug!(event_name = "events.task.pruned", removed, "pruned finished tasks");
            }
        }
    })
}

#[derive(Clone)]
pub struct BackgroundDispatcher {
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<TaskRegistry>,
}

impl BackgroundDispatcher {
    pub fn new(dispatcher: Arc<EventDispatcher>, registry: Arc<TaskRegistry>) -> Self {
        Self { dispatcher, registry }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Registers the delivery and processes it on a spawned task.
    pub async fn submit(&self, envelope: WebhookEnvelope, ctx: EventContext) -> String {
        let event_type = envelope.event.event_type();
        let task_id = self.registry.register(event_type.as_str()).await;

        let dispatcher = Arc::clone(&self.dispatcher);
        let registry = Arc::clone(&self.registry);
        let spawned_id = task_id.clone();
        tokio::spawn(async move {
            registry.mark_running(&spawned_id).await;
            match dispatcher.dispatch(&envelope, &ctx).await {
                Ok(result) => {
                    let outcome = match result {
                        HandlerResult::Responded(_) => "responded",
                        HandlerResult::Processed => "processed",
                        HandlerResult::Ignored => "ignored",
                    };
                    info!(
                        event_name = "events.task.completed",
                        correlation_id = %ctx.correlation_id,
                        task_id = %spawned_id,
                        event_type = event_type.as_str(),
                        outcome,
                        "background task completed"
                    );
                    registry.finish(&spawned_id, TaskState::Succeeded, outcome).await;
                }
                Err(dispatch_error) => {
                    error!(
                        event_name = "events.task.failed",
                        correlation_id = %ctx.correlation_id,
                        task_id = %spawned_id,
                        event_type = event_type.as_str(),
                        error = %dispatch_error,
                        "background task failed"
                    );
                    registry
                        .finish(&spawned_id, TaskState::Failed, dispatch_error.to_string())
                        .await;
                }
            }
        });

        task_id
    }
}

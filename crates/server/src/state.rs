use std::sync::Arc;

use bridgeway_core::AuthGateway;
use bridgeway_db::DbPool;
use bridgeway_events::BackgroundDispatcher;
use chrono::{DateTime, Utc};

/// Shared handles for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthGateway>,
    pub background: BackgroundDispatcher,
    pub db_pool: DbPool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        gateway: Arc<AuthGateway>,
        background: BackgroundDispatcher,
        db_pool: DbPool,
    ) -> Self {
        Self { gateway, background, db_pool, started_at: Utc::now() }
    }
}

//! Application state for the todo service.

use std::sync::Arc;

use common::config::AppConfig;
use sqlx::MySqlPool;

use crate::service::{TodoService, TodoServiceTrait};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub todos: Arc<dyn TodoServiceTrait>,
}

impl AppState {
    /// State backed by a MySQL pool.
    pub fn new(config: AppConfig, pool: MySqlPool) -> Self {
        Self::with_service(config, Arc::new(TodoService::new(pool)))
    }

    pub fn with_service(config: AppConfig, todos: Arc<dyn TodoServiceTrait>) -> Self {
        Self {
            config: Arc::new(config),
            todos,
        }
    }
}

//! Todo 服务路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{create_todo, get_todo, health_check, hello_world, import_todos, list_todos};
use crate::state::AppState;

/// 创建业务路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hello-world", get(hello_world))
        .route("/todos", get(list_todos).post(create_todo))
        .route("/todos/import", post(import_todos))
        .route("/todos/{todo_id}", get(get_todo))
        .route("/api/health", get(health_check))
}

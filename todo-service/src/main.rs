//! Todo 示例服务
//!
//! 提供以下功能：
//! - Todo 的创建、查询、标题搜索与批量导入
//! - 启动时自动执行数据库迁移
//! - 健康检查与 OpenAPI 文档

mod handlers;
mod routes;
mod service;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::db::{Migrator, MIGRATIONS};
use common::middleware::request_id::request_id_middleware;
use common::telemetry::init_tracing;
use sqlx::mysql::MySqlPoolOptions;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

const SERVICE_NAME: &str = "todo-service";
const MAX_DB_CONNECTIONS: u32 = 10;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Todo 服务 API",
        version = "0.1.0",
        description = "Todo 示例服务"
    ),
    paths(
        handlers::hello_world,
        handlers::get_todo,
        handlers::create_todo,
        handlers::list_todos,
        handlers::import_todos,
        handlers::health_check,
    ),
    components(schemas(
        common::models::Todo,
        common::models::CreateTodoRequest,
        common::models::ImportTodo,
        common::models::ImportTodosRequest,
        common::response::Pagination,
        handlers::HealthResponse,
    )),
    tags(
        (name = "hello-world", description = "示例端点"),
        (name = "todos", description = "Todo 管理端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（缺失或非法时直接退出）
    let config = AppConfig::load().context("加载配置失败")?;

    // 初始化日志追踪
    init_tracing(&config.log);

    // 连接业务库并执行迁移
    let pool = MySqlPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect_with(config.database.app_connect_options())
        .await
        .with_context(|| format!("连接数据库 `{}` 失败", config.database.name))?;

    let migrator = Migrator::new(MIGRATIONS)?;
    let mut conn = pool.acquire().await?;
    let applied = migrator.run(&mut conn).await.context("数据库迁移失败")?;
    drop(conn);
    info!(applied = applied.len(), "数据库迁移完成");

    // 创建路由
    let addr = config.listen_addr();
    let app = create_router(AppState::new(config.clone(), pool));

    // 启动服务
    info!(service = SERVICE_NAME, address = %addr, env = ?config.env, "启动服务");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址 {addr} 失败"))?;
    axum::serve(listener, app).await.context("服务异常退出")?;
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

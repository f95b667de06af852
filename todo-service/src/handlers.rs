//! Handler模块

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::config::AppEnv;
use common::errors::AppError;
use common::middleware::request_id::RequestId;
use common::models::{
    parse_todo_id, CreateTodoRequest, ImportTodosRequest, ListTodosQuery, Todo,
};
use common::response::{ApiResponse, PaginatedData};
use crate::state::AppState;
use crate::SERVICE_NAME;

fn respond<T: Serialize>(data: T, request_id: &RequestId) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok_with_service(data, SERVICE_NAME).with_request_id(request_id.as_str()))
}

fn invalid_body(rejection: JsonRejection) -> AppError {
    AppError::Validation(rejection.body_text())
}

/// 示例端点
#[utoipa::path(
    get,
    path = "/hello-world",
    tag = "hello-world",
    responses(
        (status = 200, description = "固定问候语", body = ApiResponse<String>)
    )
)]
pub async fn hello_world(Extension(request_id): Extension<RequestId>) -> Json<ApiResponse<String>> {
    respond("hello world".to_string(), &request_id)
}

/// 根据 ID 获取 Todo
#[utoipa::path(
    get,
    path = "/todos/{todo_id}",
    tag = "todos",
    params(
        ("todo_id" = String, Path, description = "Todo ID（UUIDv4）")
    ),
    responses(
        (status = 200, description = "Todo 详情", body = ApiResponse<Todo>),
        (status = 400, description = "ID 不是合法的 UUIDv4"),
        (status = 404, description = "Todo 未找到")
    )
)]
pub async fn get_todo(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(todo_id): Path<String>,
) -> Result<Json<ApiResponse<Todo>>, AppError> {
    let id = parse_todo_id(&todo_id)?;
    let todo = state.todos.get(id).await?;
    Ok(respond(todo, &request_id))
}

/// 创建 Todo
#[utoipa::path(
    post,
    path = "/todos",
    tag = "todos",
    request_body = CreateTodoRequest,
    responses(
        (status = 200, description = "Todo 已创建", body = ApiResponse<Todo>),
        (status = 400, description = "请求参数不合法")
    )
)]
pub async fn create_todo(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<CreateTodoRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Todo>>, AppError> {
    let Json(req) = body.map_err(invalid_body)?;
    req.validate()?;
    let todo = state.todos.create(req).await?;
    Ok(respond(todo, &request_id))
}

/// 按标题模糊搜索 Todo（分页）
#[utoipa::path(
    get,
    path = "/todos",
    tag = "todos",
    params(ListTodosQuery),
    responses(
        (status = 200, description = "匹配的 Todo 列表", body = ApiResponse<PaginatedData<Todo>>),
        (status = 400, description = "分页参数不合法")
    )
)]
pub async fn list_todos(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<ListTodosQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<PaginatedData<Todo>>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;
    query.validate()?;

    let title = query.title.as_deref().unwrap_or_default();
    let (items, total) = state
        .todos
        .find_by_title(title, query.page_size(), query.offset())
        .await?;
    let page = PaginatedData::new(items, total, query.page(), query.page_size());
    Ok(respond(page, &request_id))
}

/// 批量导入 Todo
///
/// 同一事务内先删除同 ID 的记录，再写入新数据。
#[utoipa::path(
    post,
    path = "/todos/import",
    tag = "todos",
    request_body = ImportTodosRequest,
    responses(
        (status = 200, description = "导入后的 Todo", body = ApiResponse<Vec<Todo>>),
        (status = 400, description = "请求参数不合法")
    )
)]
pub async fn import_todos(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<ImportTodosRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Vec<Todo>>>, AppError> {
    let Json(req) = body.map_err(invalid_body)?;
    req.validate()?;
    let todos = state.todos.import(req.todos).await?;
    Ok(respond(todos, &request_id))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务状态", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.todos.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "数据库不可用");
            "down"
        }
    };

    Json(HealthResponse {
        status: if database == "up" { "healthy" } else { "degraded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.env,
        database: database.to_string(),
        timestamp: Utc::now(),
    })
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 运行环境
    #[schema(value_type = String)]
    pub environment: AppEnv,
    /// 数据库状态
    pub database: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
}

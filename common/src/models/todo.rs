//! Todo models.
//!
//! `TodoRow` is the shape stored in `app_todo_entity`; `Todo` is what the API
//! returns. Request bodies are validated with `validator` before they reach
//! the database.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Todo {
    #[schema(example = "10ac3aed-4979-4fe8-82d1-c43c7183d446")]
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version; every write path stores 1.
    pub entity_version: i32,
}

/// Row from the `app_todo_entity` table. Timestamps are stored as UTC.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TodoRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub entity_version: i32,
}

impl TryFrom<TodoRow> for Todo {
    type Error = AppError;

    fn try_from(row: TodoRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| AppError::Internal(format!("stored todo id '{}' is not a UUID: {e}", row.id)))?;
        Ok(Self {
            id,
            title: row.title,
            description: row.description,
            due_date: row.due_date.and_utc(),
            created_at: row.created_at.and_utc(),
            updated_at: row.updated_at.and_utc(),
            entity_version: row.entity_version,
        })
    }
}

/// Request body for creating a todo.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateTodoRequest {
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(max = 65535, message = "description is too long"))]
    pub description: Option<String>,
    /// RFC 3339 timestamp.
    pub due_date: DateTime<Utc>,
}

/// One entry of an import batch; the id is kept as given.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct ImportTodo {
    pub id: Uuid,
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(max = 65535, message = "description is too long"))]
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
}

/// Request body for `POST /todos/import`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct ImportTodosRequest {
    #[validate(length(min = 1, max = 500, message = "between 1 and 500 todos per import"), nested)]
    pub todos: Vec<ImportTodo>,
}

/// Query string for `GET /todos`.
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTodosQuery {
    /// Partial title to search for.
    pub title: Option<String>,
    /// 1-based page number.
    #[validate(range(min = 1, message = "page must be a positive integer"))]
    pub page: Option<u32>,
    /// Items per page (max 100).
    #[validate(range(min = 1, max = 100, message = "page_size must be between 1 and 100"))]
    pub page_size: Option<u32>,
}

impl ListTodosQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)
    }

    /// Row offset of the first item on the page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page().saturating_sub(1)) * u64::from(self.page_size())
    }
}

/// Parses a path id; only UUIDv4 is accepted.
pub fn parse_todo_id(raw: &str) -> Result<Uuid, AppError> {
    match Uuid::parse_str(raw) {
        Ok(id) if id.get_version_num() == 4 => Ok(id),
        _ => Err(AppError::Validation(format!(
            "todo id '{raw}' is not a valid UUIDv4"
        ))),
    }
}

//! Todo 服务模块

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{MySql, MySqlConnection, MySqlPool, QueryBuilder};
use uuid::Uuid;

use common::db::TODO_TABLE_NAME;
use common::errors::{AppError, AppResult};
use common::models::{CreateTodoRequest, ImportTodo, Todo, TodoRow};
use common::utils::IdGenerator;

const TODO_COLUMNS: &str =
    "`id`, `title`, `description`, `due_date`, `created_at`, `updated_at`, `entity_version`";

/// Version of a freshly written row.
const INITIAL_ENTITY_VERSION: i32 = 1;

/// Todo 服务 Trait
#[async_trait]
pub trait TodoServiceTrait: Send + Sync {
    /// 根据 ID 获取 Todo
    async fn get(&self, id: Uuid) -> AppResult<Todo>;

    /// 创建 Todo（事务内插入并重新读取）
    async fn create(&self, req: CreateTodoRequest) -> AppResult<Todo>;

    /// 按标题模糊搜索，返回当前页与总数
    async fn find_by_title(&self, partial: &str, page_size: u32, offset: u64)
        -> AppResult<(Vec<Todo>, u64)>;

    /// 导入 Todo：同一事务内删除同 ID 的旧记录后重新写入
    async fn import(&self, todos: Vec<ImportTodo>) -> AppResult<Vec<Todo>>;

    /// 检查数据库是否可用
    async fn ping(&self) -> AppResult<()>;
}

/// 基于 MySQL 的 Todo 服务
pub struct TodoService {
    pool: MySqlPool,
}

impl TodoService {
    /// 创建新的 Todo 服务实例
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TodoServiceTrait for TodoService {
    async fn get(&self, id: Uuid) -> AppResult<Todo> {
        let sql = format!("SELECT {TODO_COLUMNS} FROM `{TODO_TABLE_NAME}` WHERE `id` = ?");
        let row: Option<TodoRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Todo::try_from)
            .transpose()?
            .ok_or_else(|| AppError::TodoNotFound(id.to_string()))
    }

    async fn create(&self, req: CreateTodoRequest) -> AppResult<Todo> {
        let id = IdGenerator::todo_id();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO `{TODO_TABLE_NAME}` (`id`, `title`, `description`, `due_date`, `entity_version`)
             VALUES (?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.due_date.naive_utc())
            .bind(INITIAL_ENTITY_VERSION)
            .execute(&mut *tx)
            .await?;

        // 在同一事务内读取，拿到数据库填充的时间戳
        let mut stored = select_by_ids(&mut tx, &[id]).await?;
        tx.commit().await?;

        let todo = stored
            .remove(&id)
            .ok_or_else(|| AppError::Internal(format!("todo '{id}' vanished after insert")))?;
        tracing::info!(id = %todo.id, "Todo 已创建");
        Ok(todo)
    }

    async fn find_by_title(
        &self,
        partial: &str,
        page_size: u32,
        offset: u64,
    ) -> AppResult<(Vec<Todo>, u64)> {
        let pattern = format!("%{}%", escape_like(partial));

        let count_sql = format!("SELECT COUNT(*) FROM `{TODO_TABLE_NAME}` WHERE `title` LIKE ?");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        let page_sql = format!(
            "SELECT {TODO_COLUMNS} FROM `{TODO_TABLE_NAME}` WHERE `title` LIKE ?
             ORDER BY `created_at`, `id` LIMIT ? OFFSET ?"
        );
        let rows: Vec<TodoRow> = sqlx::query_as(&page_sql)
            .bind(&pattern)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let todos = rows
            .into_iter()
            .map(Todo::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok((todos, u64::try_from(total).unwrap_or_default()))
    }

    async fn import(&self, todos: Vec<ImportTodo>) -> AppResult<Vec<Todo>> {
        let ids = unique_ids(&todos)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;

        let mut delete = QueryBuilder::<MySql>::new(format!("DELETE FROM `{TODO_TABLE_NAME}` WHERE `id` IN ("));
        let mut separated = delete.separated(", ");
        for id in &ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");
        let replaced = delete.build().execute(&mut *tx).await?.rows_affected();

        let mut insert = QueryBuilder::<MySql>::new(format!(
            "INSERT INTO `{TODO_TABLE_NAME}` (`id`, `title`, `description`, `due_date`, `entity_version`) "
        ));
        insert.push_values(todos, |mut row, todo| {
            row.push_bind(todo.id.to_string())
                .push_bind(todo.title)
                .push_bind(todo.description)
                .push_bind(todo.due_date.naive_utc())
                .push_bind(INITIAL_ENTITY_VERSION);
        });
        insert.build().execute(&mut *tx).await?;

        let mut stored = select_by_ids(&mut tx, &ids).await?;
        tx.commit().await?;

        tracing::info!(imported = ids.len(), replaced, "Todo 导入完成");
        Ok(ids.iter().filter_map(|id| stored.remove(id)).collect())
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn select_by_ids(conn: &mut MySqlConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Todo>> {
    let mut query = QueryBuilder::<MySql>::new(format!(
        "SELECT {TODO_COLUMNS} FROM `{TODO_TABLE_NAME}` WHERE `id` IN ("
    ));
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let rows: Vec<TodoRow> = query.build_query_as().fetch_all(&mut *conn).await?;
    rows.into_iter()
        .map(|row| Todo::try_from(row).map(|todo| (todo.id, todo)))
        .collect()
}

/// IDs in request order; a repeated ID is a validation error.
fn unique_ids(todos: &[ImportTodo]) -> AppResult<Vec<Uuid>> {
    let mut seen = HashSet::with_capacity(todos.len());
    todos
        .iter()
        .map(|todo| {
            if seen.insert(todo.id) {
                Ok(todo.id)
            } else {
                Err(AppError::Validation(format!(
                    "todo '{}' appears more than once in the import",
                    todo.id
                )))
            }
        })
        .collect()
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    fn import(id: Uuid) -> ImportTodo {
        ImportTodo {
            id,
            title: "t".into(),
            description: None,
            due_date: Utc::now(),
        }
    }

    #[test]
    fn test_unique_ids_keep_order_and_reject_repeats() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(unique_ids(&[import(b), import(a)]).unwrap(), vec![b, a]);
        assert!(matches!(
            unique_ids(&[import(a), import(b), import(a)]),
            Err(AppError::Validation(_))
        ));
    }

    mod mysql {
        use common::config::DatabaseConfig;
        use common::telemetry::init_test_tracing;
        use sqlx::mysql::MySqlPoolOptions;
        use test_db::{TestDb, TestDbOptions};

        use super::*;

        /// Needs `APP_TEST_DB_*`; returns `None` otherwise.
        async fn session() -> Option<TestDb> {
            std::env::var("APP_TEST_DB_HOST").ok()?;
            init_test_tracing();
            let config =
                DatabaseConfig::from_lookup("APP_TEST_DB", true, |key| std::env::var(key).ok())
                    .unwrap();
            Some(TestDb::setup(&config, |_| {}, TestDbOptions::default()).await.unwrap())
        }

        async fn service(db: &TestDb) -> (TodoService, MySqlPool) {
            let pool = MySqlPoolOptions::new()
                .max_connections(2)
                .connect_with(db.connect_options())
                .await
                .unwrap();
            (TodoService::new(pool.clone()), pool)
        }

        fn request(title: &str) -> CreateTodoRequest {
            CreateTodoRequest {
                title: title.to_string(),
                description: Some("from a test".into()),
                due_date: "2024-06-01T09:00:00.123Z".parse().unwrap(),
            }
        }

        #[tokio::test]
        async fn test_todo_repository_roundtrip_and_reset() {
            let Some(mut db) = session().await else { return };
            let (todos, pool) = service(&db).await;

            let created = todos.create(request("100% done")).await.unwrap();
            assert_eq!(created.entity_version, 1);
            assert_eq!(created.due_date.timestamp_millis() % 1000, 123);
            assert_eq!(todos.get(created.id).await.unwrap(), created);
            todos.create(request("100 pushups")).await.unwrap();

            let (found, total) = todos.find_by_title("100%", 20, 0).await.unwrap();
            assert_eq!(total, 1);
            assert_eq!(found[0].id, created.id);
            let (_, total) = todos.find_by_title("", 20, 0).await.unwrap();
            assert_eq!(total, 2);

            let replaced = todos
                .import(vec![ImportTodo {
                    id: created.id,
                    title: "imported".into(),
                    description: None,
                    due_date: Utc::now(),
                }])
                .await
                .unwrap();
            assert_eq!(replaced.len(), 1);
            assert_eq!(replaced[0].title, "imported");
            assert_eq!(replaced[0].entity_version, 1);
            assert!(todos.ping().await.is_ok());
            pool.close().await;

            db.reset().await.unwrap();

            let (todos, pool) = service(&db).await;
            assert!(matches!(
                todos.get(created.id).await,
                Err(AppError::TodoNotFound(_))
            ));
            let (_, total) = todos.find_by_title("", 20, 0).await.unwrap();
            assert_eq!(total, 0);
            pool.close().await;

            db.teardown().await.unwrap();
        }
    }
}

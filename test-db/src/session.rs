//! Test database session: create, reset between cases, tear down.
//!
//! ```text
//! Uninitialized -> Created -> Ready <-> Resetting
//!                               |
//!                               v
//!                           TornDown
//! ```
//!
//! `reset` takes `&mut self`, so two resets of one session can never overlap.

use std::time::Duration;

use common::config::DatabaseConfig;
use common::db::{Migration, Migrator, MIGRATIONS};
use common::utils::{IdGenerator, Identifier};
use futures_util::future::try_join_all;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::Executor;

use crate::error::{ResetStep, TestDbError, TestDbResult};
use crate::inventory::TableInventory;
use crate::provisioner::{Connection, DatabaseHandle, Provisioner};

const DISABLE_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = 0";
const ENABLE_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = 1";

/// Lifecycle state of a [`TestDb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Working database exists; setup has not finished.
    Created,
    Ready,
    Resetting,
    TornDown,
}

/// Session options.
#[derive(Debug, Clone)]
pub struct TestDbOptions {
    /// Build a template and restore from it in [`TestDb::reset`]. Without it
    /// no template is created and `reset` does nothing.
    pub reset: bool,
    /// Upper bound for [`TestDb::create`].
    pub create_timeout: Duration,
    /// Connections used to copy template rows in parallel.
    pub copy_concurrency: u32,
    pub migrations: &'static [Migration],
}

impl Default for TestDbOptions {
    fn default() -> Self {
        Self {
            reset: true,
            create_timeout: Duration::from_secs(30),
            copy_concurrency: 4,
            migrations: MIGRATIONS,
        }
    }
}

impl TestDbOptions {
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    pub fn with_copy_concurrency(mut self, connections: u32) -> Self {
        self.copy_concurrency = connections.max(1);
        self
    }

    pub fn with_migrations(mut self, migrations: &'static [Migration]) -> Self {
        self.migrations = migrations;
        self
    }
}

/// One throwaway working database, plus its template when resets are on.
pub struct TestDb {
    provisioner: Provisioner,
    migrator: Migrator,
    options: TestDbOptions,
    working_name: Identifier,
    template_name: Option<Identifier>,
    working: Option<DatabaseHandle>,
    template: Option<DatabaseHandle>,
    inventory: Option<TableInventory>,
    state: SessionState,
}

impl TestDb {
    /// Prepares a session with a freshly generated database name. Nothing is
    /// created on the server until [`TestDb::create`].
    pub fn new(config: &DatabaseConfig, options: TestDbOptions) -> TestDbResult<Self> {
        let working_name = Identifier::parse(IdGenerator::test_database_name())?;
        let template_name = if options.reset {
            Some(Identifier::parse(format!("{working_name}__template"))?)
        } else {
            None
        };
        let migrator =
            Migrator::new(options.migrations).map_err(|source| TestDbError::Migration {
                database: working_name.to_string(),
                source,
            })?;

        Ok(Self {
            provisioner: Provisioner::new(config),
            migrator,
            options,
            working_name,
            template_name,
            working: None,
            template: None,
            inventory: None,
            state: SessionState::Uninitialized,
        })
    }

    /// Creates the session and calls `on_ready` once it is usable.
    ///
    /// A failed setup leaves whatever was already created on the server;
    /// call [`TestDb::teardown`] to clean it up.
    pub async fn setup<F>(
        config: &DatabaseConfig,
        on_ready: F,
        options: TestDbOptions,
    ) -> TestDbResult<Self>
    where
        F: FnOnce(&TestDb),
    {
        let mut db = Self::new(config, options)?;
        db.create().await?;
        on_ready(&db);
        Ok(db)
    }

    /// Name of the working database; point the application under test here.
    pub fn working_database_name(&self) -> &str {
        self.working_name.as_str()
    }

    /// Name of the template database, if resets are enabled.
    pub fn template_database_name(&self) -> Option<&str> {
        self.template_name.as_ref().map(Identifier::as_str)
    }

    /// Connect options for the working database.
    pub fn connect_options(&self) -> MySqlConnectOptions {
        self.provisioner.connect_options(&self.working_name)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &TestDbOptions {
        &self.options
    }

    /// Tables recorded from the template; `None` unless resets are enabled
    /// and the session was created.
    pub fn inventory(&self) -> Option<&TableInventory> {
        self.inventory.as_ref()
    }

    /// Creates and migrates the working database and, with resets enabled,
    /// the template database whose inventory is recorded.
    ///
    /// Bounded by `create_timeout`. On timeout the databases created so far
    /// stay on the server.
    pub async fn create(&mut self) -> TestDbResult<()> {
        self.expect_state("create", &[SessionState::Uninitialized])?;

        let limit = self.options.create_timeout;
        let outcome = tokio::time::timeout(limit, self.provision()).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    database = %self.working_name,
                    timeout = ?limit,
                    "Test database setup timed out; created databases are left behind"
                );
                Err(TestDbError::Timeout(limit))
            }
        }
    }

    async fn provision(&mut self) -> TestDbResult<()> {
        let working = self.provisioner.create_database(&self.working_name).await?;
        self.working = Some(working);
        self.state = SessionState::Created;

        let mut conn = self.provisioner.open_connection(&self.working_name).await?;
        let migrated = self.migrate(&mut conn).await;
        conn.release(migrated).await?;

        if let Some(template_name) = self.template_name.clone() {
            let template = self.provisioner.create_database(&template_name).await?;
            self.template = Some(template);

            let mut conn = self.provisioner.open_connection(&template_name).await?;
            let captured = async {
                self.migrate(&mut conn).await?;
                TableInventory::capture(conn.get_mut()?, &template_name).await
            }
            .await;
            self.inventory = Some(conn.release(captured).await?);
        }

        self.state = SessionState::Ready;
        tracing::info!(
            database = %self.working_name,
            template = ?self.template_database_name(),
            "Test database ready"
        );
        Ok(())
    }

    async fn migrate(&self, conn: &mut Connection) -> TestDbResult<()> {
        let database = conn.database().to_string();
        let applied = self
            .migrator
            .run(conn.get_mut()?)
            .await
            .map_err(|source| TestDbError::Migration { database, source })?;
        tracing::debug!(database = %conn.database(), migrations = applied.len(), "Schema initialized");
        Ok(())
    }

    /// Restores the working database to the template's contents.
    ///
    /// Does nothing when resets are disabled. A failed reset leaves the
    /// working database in an unknown state; the session itself stays usable
    /// for further resets and teardown.
    pub async fn reset(&mut self) -> TestDbResult<()> {
        if !self.options.reset {
            return Ok(());
        }
        self.expect_state("reset", &[SessionState::Ready])?;

        self.state = SessionState::Resetting;
        let result = self.restore().await;
        self.state = SessionState::Ready;

        match &result {
            Ok(()) => tracing::debug!(database = %self.working_name, "Test database reset"),
            Err(e) => tracing::error!(database = %self.working_name, error = %e, "Test database reset failed"),
        }
        result
    }

    async fn restore(&self) -> TestDbResult<()> {
        let (Some(template), Some(inventory)) = (self.template_name.as_ref(), self.inventory.as_ref())
        else {
            return Err(TestDbError::InvalidState {
                operation: "reset without a template",
                state: self.state,
            });
        };
        let working = &self.working_name;

        let raw = self
            .provisioner
            .connect_raw(working)
            .await
            .map_err(reset_failure(working, ResetStep::Connect, None))?;
        let mut conn = Connection::from_raw(working.clone(), raw);

        let outcome = self.restore_on(&mut conn, template, inventory).await;
        let closed = conn.close().await;
        outcome?;
        closed.map_err(|e| match e {
            TestDbError::Connection { source, .. } => {
                reset_failure(working, ResetStep::Close, None)(source)
            }
            other => other,
        })
    }

    async fn restore_on(
        &self,
        conn: &mut Connection,
        template: &Identifier,
        inventory: &TableInventory,
    ) -> TestDbResult<()> {
        let working = &self.working_name;
        let raw = conn.get_mut()?;

        (&mut *raw).execute(DISABLE_FOREIGN_KEY_CHECKS)
            .await
            .map_err(reset_failure(working, ResetStep::DisableForeignKeyChecks, None))?;

        // Deletes run one table at a time, in inventory order.
        for table in inventory.tables() {
            let sql = format!("DELETE FROM {}", table.quoted());
            (&mut *raw).execute(sql.as_str())
                .await
                .map_err(reset_failure(working, ResetStep::DeleteRows, Some(table)))?;
        }

        for (table, value) in inventory.auto_increments() {
            let sql = format!("ALTER TABLE {} AUTO_INCREMENT = {value}", table.quoted());
            (&mut *raw).execute(sql.as_str())
                .await
                .map_err(reset_failure(working, ResetStep::RestoreAutoIncrement, Some(table)))?;
        }

        self.copy_rows(template, inventory).await?;

        (&mut *raw).execute(ENABLE_FOREIGN_KEY_CHECKS)
            .await
            .map_err(reset_failure(working, ResetStep::EnableForeignKeyChecks, None))?;
        Ok(())
    }

    /// Copies every inventory table from the template, tables in parallel.
    ///
    /// FOREIGN_KEY_CHECKS is a session variable, so the copy pool disables it
    /// on each of its own connections.
    async fn copy_rows(&self, template: &Identifier, inventory: &TableInventory) -> TestDbResult<()> {
        let working = &self.working_name;
        let pool = self
            .provisioner
            .open_pool(working, self.options.copy_concurrency, DISABLE_FOREIGN_KEY_CHECKS)
            .await
            .map_err(reset_failure(working, ResetStep::CopyRows, None))?;

        let copies = inventory.tables().map(|table| {
            let sql = format!(
                "INSERT INTO {} SELECT * FROM {}",
                Identifier::qualified(working, table),
                Identifier::qualified(template, table),
            );
            let failed = reset_failure(working, ResetStep::CopyRows, Some(table));
            let pool = &pool;
            async move { pool.execute(sql.as_str()).await.map_err(failed) }
        });
        let result = try_join_all(copies).await;
        pool.close().await;

        let copied: u64 = result?.iter().map(|r| r.rows_affected()).sum();
        tracing::debug!(database = %working, rows = copied, "Template rows copied");
        Ok(())
    }

    /// Drops the working database and, if present, the template.
    ///
    /// Both drops are attempted. If either fails the error names the failed
    /// database and lists the ones that were dropped.
    pub async fn teardown(&mut self) -> TestDbResult<()> {
        if matches!(self.state, SessionState::TornDown | SessionState::Resetting) {
            return Err(TestDbError::InvalidState {
                operation: "tear down",
                state: self.state,
            });
        }
        self.state = SessionState::TornDown;

        let mut dropped = Vec::new();
        let mut failure = None;
        for handle in [self.working.take(), self.template.take()].into_iter().flatten() {
            let name = handle.name().to_string();
            match self.provisioner.drop_database(handle).await {
                Ok(()) => dropped.push(name),
                Err(e) => {
                    tracing::warn!(database = %name, error = %e, "Failed to drop test database");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            None => {
                tracing::info!(databases = ?dropped, "Test databases torn down");
                Ok(())
            }
            Some(TestDbError::DatabaseTeardown { name, source, .. }) => {
                Err(TestDbError::DatabaseTeardown {
                    name,
                    dropped,
                    source,
                })
            }
            Some(other) => Err(other),
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> TestDbResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TestDbError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let leaked: Vec<&str> = [&self.working, &self.template]
            .into_iter()
            .flatten()
            .map(|h| h.name().as_str())
            .collect();
        if !leaked.is_empty() {
            tracing::warn!(
                databases = ?leaked,
                "TestDb dropped without teardown; databases left on the server"
            );
        }
    }
}

fn reset_failure(
    database: &Identifier,
    step: ResetStep,
    table: Option<&Identifier>,
) -> impl FnOnce(sqlx::Error) -> TestDbError {
    let database = database.to_string();
    let table = table.map(Identifier::to_string);
    move |source| TestDbError::Reset {
        database,
        step,
        table,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".into(),
            port: 3306,
            user: "root".into(),
            pass: "root".into(),
            name: "scratch".into(),
            ssl: false,
        }
    }

    #[test]
    fn test_defaults_enable_reset() {
        let options = TestDbOptions::default();
        assert!(options.reset);
        assert_eq!(options.create_timeout, Duration::from_secs(30));
        assert_eq!(options.migrations.len(), MIGRATIONS.len());
        assert_eq!(options.with_copy_concurrency(0).copy_concurrency, 1);
    }

    #[test]
    fn test_template_name_only_with_reset() {
        let db = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        assert!(db.working_database_name().starts_with("test__"));
        assert_eq!(
            db.template_database_name(),
            Some(format!("{}__template", db.working_database_name()).as_str())
        );
        assert_eq!(db.state(), SessionState::Uninitialized);
        assert!(db.inventory().is_none());

        let plain = TestDb::new(&config(), TestDbOptions::default().with_reset(false)).unwrap();
        assert_eq!(plain.template_database_name(), None);
    }

    #[test]
    fn test_sessions_get_distinct_names() {
        let a = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        let b = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        assert_ne!(a.working_database_name(), b.working_database_name());
    }

    #[test]
    fn test_connect_options_target_working_database() {
        let db = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        assert_eq!(db.connect_options().get_database(), Some(db.working_database_name()));
    }

    #[tokio::test]
    async fn test_reset_before_create_is_rejected() {
        let mut db = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        let err = db.reset().await.unwrap_err();
        assert!(matches!(
            err,
            TestDbError::InvalidState {
                state: SessionState::Uninitialized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reset_is_noop_when_disabled() {
        let mut db = TestDb::new(&config(), TestDbOptions::default().with_reset(false)).unwrap();
        db.reset().await.unwrap();
        assert_eq!(db.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_teardown_of_unused_session_drops_nothing() {
        let mut db = TestDb::new(&config(), TestDbOptions::default()).unwrap();
        db.teardown().await.unwrap();
        assert_eq!(db.state(), SessionState::TornDown);

        let err = db.teardown().await.unwrap_err();
        assert!(matches!(err, TestDbError::InvalidState { .. }));
        assert!(matches!(db.create().await, Err(TestDbError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_create_times_out_against_silent_server() {
        // Accepts TCP connections into the backlog but never sends a greeting.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = DatabaseConfig {
            port: listener.local_addr().unwrap().port(),
            ..config()
        };
        let options = TestDbOptions::default().with_create_timeout(Duration::from_millis(50));
        let mut db = TestDb::new(&config, options).unwrap();

        let err = db.create().await.unwrap_err();
        assert!(matches!(err, TestDbError::Timeout(limit) if limit == Duration::from_millis(50)));
        assert_eq!(db.state(), SessionState::Uninitialized);

        db.teardown().await.unwrap();
        assert_eq!(db.state(), SessionState::TornDown);
        drop(listener);
    }

    static DUPLICATE_VERSIONS: &[Migration] = &[
        Migration {
            version: 1,
            name: "A",
            up: &[],
            down: &[],
        },
        Migration {
            version: 1,
            name: "B",
            up: &[],
            down: &[],
        },
    ];

    #[test]
    fn test_invalid_migration_set_is_rejected_up_front() {
        let result = TestDb::new(
            &config(),
            TestDbOptions::default().with_migrations(DUPLICATE_VERSIONS),
        );
        assert!(matches!(result, Err(TestDbError::Migration { .. })));
    }
}

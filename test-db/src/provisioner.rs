//! Database provisioning against the configured MySQL server.
//!
//! Creates and drops databases by name and hands out connections scoped to
//! one database. Nothing here is pooled across calls: every operation opens
//! what it needs and closes it before returning.

use common::config::DatabaseConfig;
use common::utils::Identifier;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{ConnectOptions, Connection as _, Executor, MySqlConnection, MySqlPool};

use crate::error::{TestDbError, TestDbResult};

/// A database created on the server. Dropping it consumes the handle.
#[derive(Debug)]
pub struct DatabaseHandle {
    name: Identifier,
    server: String,
}

impl DatabaseHandle {
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    /// `host:port` of the server holding the database.
    pub fn server(&self) -> &str {
        &self.server
    }
}

/// Opens connections and runs database-level DDL for one server.
#[derive(Debug, Clone)]
pub struct Provisioner {
    options: MySqlConnectOptions,
    server: String,
}

impl Provisioner {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            options: config.connect_options(),
            server: format!("{}:{}", config.host, config.port),
        }
    }

    /// Connect options with `database` as the default schema.
    pub fn connect_options(&self, database: &Identifier) -> MySqlConnectOptions {
        self.options.clone().database(database.as_str())
    }

    /// `CREATE DATABASE`; fails if the name is taken or the server refuses.
    pub async fn create_database(&self, name: &Identifier) -> TestDbResult<DatabaseHandle> {
        let failed = |source| TestDbError::DatabaseCreation {
            name: name.to_string(),
            source,
        };

        let mut conn = self.options.connect().await.map_err(failed)?;
        let sql = format!("CREATE DATABASE {}", name.quoted());
        let result = conn.execute(sql.as_str()).await;
        close_server_connection(conn).await;
        result.map_err(failed)?;

        tracing::info!(database = %name, server = %self.server, "Database created");
        Ok(DatabaseHandle {
            name: name.clone(),
            server: self.server.clone(),
        })
    }

    /// `DROP DATABASE`; fails if it no longer exists or cannot be dropped.
    pub async fn drop_database(&self, handle: DatabaseHandle) -> TestDbResult<()> {
        let name = handle.name;
        let failed = |source| TestDbError::DatabaseTeardown {
            name: name.to_string(),
            dropped: Vec::new(),
            source,
        };

        let mut conn = self.options.connect().await.map_err(failed)?;
        let sql = format!("DROP DATABASE {}", name.quoted());
        let result = conn.execute(sql.as_str()).await;
        close_server_connection(conn).await;
        result.map_err(failed)?;

        tracing::info!(database = %name, server = %self.server, "Database dropped");
        Ok(())
    }

    /// Opens a connection with `name` as its default schema. Any number of
    /// connections to the same database may be open at once.
    pub async fn open_connection(&self, name: &Identifier) -> TestDbResult<Connection> {
        let inner = self
            .connect_raw(name)
            .await
            .map_err(|source| TestDbError::Connection {
                database: name.to_string(),
                source,
            })?;
        Ok(Connection::from_raw(name.clone(), inner))
    }

    pub(crate) async fn connect_raw(&self, name: &Identifier) -> Result<MySqlConnection, sqlx::Error> {
        self.connect_options(name).connect().await
    }

    /// Short-lived pool on `name` whose every session first runs `session_init`.
    pub(crate) async fn open_pool(
        &self,
        name: &Identifier,
        max_connections: u32,
        session_init: &'static str,
    ) -> Result<MySqlPool, sqlx::Error> {
        MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(session_init).await?;
                    Ok(())
                })
            })
            .connect_with(self.connect_options(name))
            .await
    }
}

async fn close_server_connection(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "Server connection did not close cleanly");
    }
}

/// A connection scoped to one database.
///
/// Must be closed explicitly; closing twice, or using it after close, is a
/// `ConnectionState` error.
#[derive(Debug)]
pub struct Connection {
    database: Identifier,
    inner: Option<MySqlConnection>,
}

impl Connection {
    pub(crate) fn from_raw(database: Identifier, inner: MySqlConnection) -> Self {
        Self {
            database,
            inner: Some(inner),
        }
    }

    pub fn database(&self) -> &Identifier {
        &self.database
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// The live sqlx connection.
    pub fn get_mut(&mut self) -> TestDbResult<&mut MySqlConnection> {
        match self.inner.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(TestDbError::ConnectionState {
                database: self.database.to_string(),
                reason: "closed",
            }),
        }
    }

    pub async fn close(&mut self) -> TestDbResult<()> {
        let conn = self.inner.take().ok_or_else(|| TestDbError::ConnectionState {
            database: self.database.to_string(),
            reason: "already closed",
        })?;
        conn.close().await.map_err(|source| TestDbError::Connection {
            database: self.database.to_string(),
            source,
        })
    }

    /// Closes the connection, then returns `result`. The body's error takes
    /// precedence over a close error.
    pub async fn release<T>(mut self, result: TestDbResult<T>) -> TestDbResult<T> {
        let closed = self.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::debug!(database = %self.database, "Connection dropped without close");
        }
    }
}

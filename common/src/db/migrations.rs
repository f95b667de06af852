//! Versioned schema migrations.
//!
//! A migration is a numbered list of statements. `Migrator::run` applies the
//! ones not yet recorded in `MIGRATION_TABLE_NAME`, lowest version first.
//! Each migration runs in its own transaction together with its bookkeeping
//! row; a failure stops the batch and leaves earlier migrations applied.
//! `down` statements are kept for operators and are never run here.

use std::collections::BTreeSet;

use sqlx::{Connection, MySqlConnection};
use thiserror::Error;

use super::MIGRATION_TABLE_NAME;

/// One schema change.
///
/// MySQL commits DDL implicitly, so only DML in `up` is rolled back on
/// failure. Keep at most one DDL statement per migration: a second one that
/// fails leaves the first applied with no bookkeeping row, and the next run
/// trips over it.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Monotonic version, conventionally a millisecond timestamp.
    pub version: i64,
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

impl Migration {
    /// Number of `up` statements MySQL commits implicitly.
    pub fn ddl_statements(&self) -> usize {
        self.up.iter().filter(|sql| is_ddl(sql)).count()
    }
}

fn is_ddl(sql: &str) -> bool {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE")
}

/// The application's schema.
pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1586337388174,
    name: "InitialTodoEntity",
    up: &["CREATE TABLE `app_todo_entity` (
            `id`             CHAR(36)     NOT NULL,
            `title`          VARCHAR(255) NOT NULL,
            `description`    TEXT         NULL,
            `due_date`       DATETIME(3)  NOT NULL,
            `created_at`     DATETIME(3)  NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
            `updated_at`     DATETIME(3)  NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
            `entity_version` INT          NOT NULL,
            PRIMARY KEY (`id`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"],
    down: &["DROP TABLE `app_todo_entity`"],
}];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration version {0} is defined more than once")]
    DuplicateVersion(i64),

    #[error("migration bookkeeping on `{table}` failed: {source}")]
    Bookkeeping {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration {version} ({name}) failed: {source}")]
    Failed {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Applies a migration set to a connection.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations: Vec<&'static Migration>,
}

impl Migrator {
    /// Orders `set` by version. Duplicate versions are rejected.
    pub fn new(set: &'static [Migration]) -> Result<Self, MigrationError> {
        let mut migrations: Vec<&'static Migration> = set.iter().collect();
        migrations.sort_by_key(|m| m.version);
        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(MigrationError::DuplicateVersion(pair[0].version));
        }
        Ok(Self { migrations })
    }

    /// Versions in application order.
    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version).collect()
    }

    /// Migrations whose version is not in `applied`, in application order.
    pub fn pending(&self, applied: &BTreeSet<i64>) -> Vec<&'static Migration> {
        self.migrations
            .iter()
            .copied()
            .filter(|m| !applied.contains(&m.version))
            .collect()
    }

    /// Applies all pending migrations and returns the versions applied.
    pub async fn run(&self, conn: &mut MySqlConnection) -> Result<Vec<i64>, MigrationError> {
        self.ensure_table(conn).await?;
        let applied = self.applied_versions(conn).await?;

        let mut done = Vec::new();
        for migration in self.pending(&applied) {
            apply(conn, migration).await?;
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Migration applied"
            );
            done.push(migration.version);
        }

        if done.is_empty() {
            tracing::debug!("Schema is up to date");
        }
        Ok(done)
    }

    /// Versions already recorded in the bookkeeping table.
    pub async fn applied_versions(
        &self,
        conn: &mut MySqlConnection,
    ) -> Result<BTreeSet<i64>, MigrationError> {
        let sql = format!("SELECT `timestamp` FROM `{MIGRATION_TABLE_NAME}`");
        let rows: Vec<(i64,)> = sqlx::query_as(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(bookkeeping)?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn ensure_table(&self, conn: &mut MySqlConnection) -> Result<(), MigrationError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{MIGRATION_TABLE_NAME}` (
                `id`        INT          NOT NULL AUTO_INCREMENT,
                `timestamp` BIGINT       NOT NULL,
                `name`      VARCHAR(255) NOT NULL,
                PRIMARY KEY (`id`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
        sqlx::raw_sql(&sql)
            .execute(&mut *conn)
            .await
            .map_err(bookkeeping)?;
        Ok(())
    }
}

async fn apply(conn: &mut MySqlConnection, migration: &'static Migration) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::Failed {
        version: migration.version,
        name: migration.name,
        source,
    };

    let mut tx = conn.begin().await.map_err(failed)?;
    for statement in migration.up {
        sqlx::raw_sql(statement)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
    }

    let record = format!("INSERT INTO `{MIGRATION_TABLE_NAME}` (`timestamp`, `name`) VALUES (?, ?)");
    sqlx::query(&record)
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

    tx.commit().await.map_err(failed)
}

fn bookkeeping(source: sqlx::Error) -> MigrationError {
    MigrationError::Bookkeeping {
        table: MIGRATION_TABLE_NAME,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TODO_TABLE_NAME;

    static UNORDERED: &[Migration] = &[
        Migration {
            version: 30,
            name: "Third",
            up: &[],
            down: &[],
        },
        Migration {
            version: 10,
            name: "First",
            up: &[],
            down: &[],
        },
        Migration {
            version: 20,
            name: "Second",
            up: &[],
            down: &[],
        },
    ];

    static DUPLICATED: &[Migration] = &[
        Migration {
            version: 7,
            name: "A",
            up: &[],
            down: &[],
        },
        Migration {
            version: 7,
            name: "B",
            up: &[],
            down: &[],
        },
    ];

    #[test]
    fn test_migrations_are_ordered_by_version() {
        let migrator = Migrator::new(UNORDERED).unwrap();
        assert_eq!(migrator.versions(), vec![10, 20, 30]);
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let err = Migrator::new(DUPLICATED).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion(7)));
    }

    #[test]
    fn test_pending_skips_applied() {
        let migrator = Migrator::new(UNORDERED).unwrap();
        let applied = BTreeSet::from([20]);
        let pending: Vec<_> = migrator.pending(&applied).iter().map(|m| m.name).collect();
        assert_eq!(pending, vec!["First", "Third"]);
    }

    #[test]
    fn test_ddl_statements_are_counted() {
        let mixed = Migration {
            version: 1,
            name: "Mixed",
            up: &[
                "  create table `app_a` (`id` INT)",
                "INSERT INTO `app_a` VALUES (1)",
                "ALTER TABLE `app_a` ADD `b` INT",
            ],
            down: &[],
        };
        assert_eq!(mixed.ddl_statements(), 2);
        assert!(MIGRATIONS.iter().all(|m| m.ddl_statements() <= 1));
    }

    #[test]
    fn test_application_schema_targets_todo_table() {
        let migrator = Migrator::new(MIGRATIONS).unwrap();
        assert!(!migrator.versions().is_empty());
        let initial = &MIGRATIONS[0];
        assert!(initial.up[0].contains(TODO_TABLE_NAME));
        assert!(initial.down[0].contains(TODO_TABLE_NAME));
    }
}

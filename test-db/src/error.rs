//! Test database errors.
//!
//! None of these are retried. A failed create should abort the suite, a
//! failed reset the current case; a failed teardown is reported and the
//! leaked databases have to be removed by hand.

use std::fmt;

use common::db::MigrationError;
use common::utils::InvalidIdentifier;
use thiserror::Error;

use crate::session::SessionState;

pub type TestDbResult<T> = Result<T, TestDbError>;

/// Stage of a reset, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    Connect,
    DisableForeignKeyChecks,
    DeleteRows,
    RestoreAutoIncrement,
    CopyRows,
    EnableForeignKeyChecks,
    Close,
}

impl fmt::Display for ResetStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ResetStep::Connect => "open reset connection",
            ResetStep::DisableForeignKeyChecks => "disable foreign key checks",
            ResetStep::DeleteRows => "delete rows",
            ResetStep::RestoreAutoIncrement => "restore AUTO_INCREMENT",
            ResetStep::CopyRows => "copy template rows",
            ResetStep::EnableForeignKeyChecks => "enable foreign key checks",
            ResetStep::Close => "close reset connection",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Error)]
pub enum TestDbError {
    #[error("failed to create database `{name}`: {source}")]
    DatabaseCreation {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// `dropped` lists the databases that were removed before (or despite)
    /// the failure.
    #[error("failed to drop database `{name}` (dropped: [{}]): {source}", .dropped.join(", "))]
    DatabaseTeardown {
        name: String,
        dropped: Vec<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("connection to `{database}` is {reason}")]
    ConnectionState {
        database: String,
        reason: &'static str,
    },

    /// Opening or closing a connection failed at the protocol level.
    #[error("connection to `{database}` failed: {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migrating `{database}` failed: {source}")]
    Migration {
        database: String,
        #[source]
        source: MigrationError,
    },

    #[error("reset of `{database}` failed at step '{step}'{}: {source}",
        .table.as_ref().map(|t| format!(" on table `{t}`")).unwrap_or_default())]
    Reset {
        database: String,
        step: ResetStep,
        table: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot {operation} while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error("capturing the table inventory of `{database}` failed: {source}")]
    Inventory {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("creating the test database did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_error_names_step_and_table() {
        let err = TestDbError::Reset {
            database: "test__1".into(),
            step: ResetStep::DeleteRows,
            table: Some("app_todo_entity".into()),
            source: sqlx::Error::RowNotFound,
        };
        let msg = err.to_string();
        assert!(msg.contains("delete rows"), "{msg}");
        assert!(msg.contains("`app_todo_entity`"), "{msg}");
    }

    #[test]
    fn test_teardown_error_lists_dropped_databases() {
        let err = TestDbError::DatabaseTeardown {
            name: "test__1__template".into(),
            dropped: vec!["test__1".into()],
            source: sqlx::Error::RowNotFound,
        };
        assert!(err.to_string().contains("dropped: [test__1]"));
    }
}

//! Table inventory of a template database.
//!
//! Captured once, right after the template is migrated, and never refreshed:
//! every reset walks exactly this list in exactly this order.

use common::utils::Identifier;
use sqlx::{Executor, MySqlConnection, Row};

use crate::error::{TestDbError, TestDbResult};

/// One table and its AUTO_INCREMENT counter at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: Identifier,
    /// `None` when the table has no AUTO_INCREMENT column.
    pub auto_increment: Option<u64>,
}

/// Tables in the order `SHOW TABLES` returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInventory {
    entries: Vec<TableEntry>,
}

impl TableInventory {
    pub fn new(entries: Vec<TableEntry>) -> Self {
        Self { entries }
    }

    /// Lists the tables of `schema` (the connection's default database) and
    /// reads each table's AUTO_INCREMENT from `information_schema`.
    pub async fn capture(conn: &mut MySqlConnection, schema: &Identifier) -> TestDbResult<Self> {
        let failed = |source| TestDbError::Inventory {
            database: schema.to_string(),
            source,
        };

        // MySQL 8 caches information_schema statistics; older servers and
        // MariaDB don't know the variable.
        if let Err(e) = (&mut *conn)
            .execute("SET SESSION information_schema_stats_expiry = 0")
            .await
        {
            tracing::debug!(error = %e, "information_schema_stats_expiry not supported");
        }

        let rows = (&mut *conn).fetch_all("SHOW TABLES").await.map_err(failed)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: Vec<u8> = row.try_get(0).map_err(failed)?;
            let name = String::from_utf8(raw)
                .map_err(|e| failed(sqlx::Error::Decode(Box::new(e))))?;
            let name = Identifier::parse(name)?;

            let auto_increment: Option<u64> = sqlx::query_scalar(
                "SELECT AUTO_INCREMENT FROM information_schema.TABLES
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
            )
            .bind(schema.as_str())
            .bind(name.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(failed)?
            .flatten();

            entries.push(TableEntry {
                name,
                auto_increment,
            });
        }

        tracing::info!(
            database = %schema,
            tables = entries.len(),
            "Table inventory captured"
        );
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Table names in capture order.
    pub fn tables(&self) -> impl Iterator<Item = &Identifier> {
        self.entries.iter().map(|e| &e.name)
    }

    /// Tables that have a recorded counter, in capture order.
    pub fn auto_increments(&self) -> impl Iterator<Item = (&Identifier, u64)> {
        self.entries
            .iter()
            .filter_map(|e| e.auto_increment.map(|v| (&e.name, v)))
    }

    pub fn get(&self, table: &str) -> Option<&TableEntry> {
        self.entries.iter().find(|e| e.name.as_str() == table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.get(table).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, auto_increment: Option<u64>) -> TableEntry {
        TableEntry {
            name: Identifier::parse(name).unwrap(),
            auto_increment,
        }
    }

    fn sample() -> TableInventory {
        TableInventory::new(vec![
            entry("app__migrations", Some(2)),
            entry("app_todo_entity", None),
            entry("app_author", Some(1)),
        ])
    }

    #[test]
    fn test_tables_keep_capture_order() {
        let names: Vec<_> = sample().tables().map(|t| t.as_str().to_string()).collect();
        assert_eq!(names, ["app__migrations", "app_todo_entity", "app_author"]);
    }

    #[test]
    fn test_auto_increments_skip_absent_counters() {
        let inventory = sample();
        let counters: Vec<_> = inventory
            .auto_increments()
            .map(|(t, v)| (t.as_str(), v))
            .collect();
        assert_eq!(counters, [("app__migrations", 2), ("app_author", 1)]);
    }

    #[test]
    fn test_lookup() {
        let inventory = sample();
        assert!(inventory.contains("app_todo_entity"));
        assert!(!inventory.contains("app_missing"));
        assert_eq!(inventory.get("app_author").unwrap().auto_increment, Some(1));
        assert_eq!(inventory.len(), 3);
        assert!(TableInventory::default().is_empty());
    }
}

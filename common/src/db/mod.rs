//! Table naming and schema management.
//!
//! All application tables share `TABLE_PREFIX`; the migration bookkeeping
//! table lives under the same prefix.

pub mod migrations;

pub use migrations::{Migration, MigrationError, Migrator, MIGRATIONS};

/// Prefix shared by every table the application owns.
pub const TABLE_PREFIX: &str = "app_";

/// Bookkeeping table for applied migrations.
pub const MIGRATION_TABLE_NAME: &str = "app__migrations";

/// Todo entity table.
pub const TODO_TABLE_NAME: &str = "app_todo_entity";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Identifier;

    #[test]
    fn test_table_names_share_prefix() {
        for name in [MIGRATION_TABLE_NAME, TODO_TABLE_NAME] {
            assert!(name.starts_with(TABLE_PREFIX), "{name}");
            assert!(Identifier::parse(name).is_ok(), "{name}");
        }
        assert_ne!(MIGRATION_TABLE_NAME, TODO_TABLE_NAME);
    }
}

//! Unique ID generator.

use uuid::Uuid;

/// Generates unique identifiers for various entities.
pub struct IdGenerator;

impl IdGenerator {
    /// New todo primary key (UUIDv4).
    pub fn todo_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Generates a unique request ID.
    pub fn request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a short unique ID (first 8 hex characters of a UUIDv4).
    pub fn short_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    /// Fresh name for a throwaway test database, e.g. `test__9f2c01ab`.
    pub fn test_database_name() -> String {
        format!("test__{}", Self::short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_todo_id_is_v4() {
        assert_eq!(IdGenerator::todo_id().get_version_num(), 4);
    }

    #[test]
    fn test_short_id_length() {
        let id = IdGenerator::short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_database_names_differ() {
        let a = IdGenerator::test_database_name();
        let b = IdGenerator::test_database_name();
        assert!(a.starts_with("test__"));
        assert_ne!(a, b);
    }
}

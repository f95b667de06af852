//! SQL identifier validation.
//!
//! Database and table names cannot be bound as statement parameters, so every
//! name that ends up inside SQL text goes through `Identifier` first.

use std::fmt;

use thiserror::Error;

/// Longest identifier MySQL accepts for schemas and tables.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Rejected identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SQL identifier '{name}': {reason}")]
pub struct InvalidIdentifier {
    pub name: String,
    pub reason: &'static str,
}

/// A schema or table name restricted to `[A-Za-z0-9_$]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validates `name`.
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let name = name.into();
        let reject = |reason| InvalidIdentifier {
            name: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(reject("empty"));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(reject("longer than 64 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(reject("only ASCII letters, digits, '_' and '$' are allowed"));
        }
        if name.chars().all(|c| c.is_ascii_digit()) {
            return Err(reject("must not consist of digits only"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backtick-quoted form for use in SQL text.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }

    /// `` `schema`.`table` ``
    pub fn qualified(schema: &Identifier, table: &Identifier) -> String {
        format!("{}.{}", schema.quoted(), table.quoted())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identifier {
    type Error = InvalidIdentifier;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Identifier::parse(value)
    }
}

impl TryFrom<String> for Identifier {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_allowed() {
        assert!(Identifier::parse("app_todo_entity").is_ok());
        assert!(Identifier::parse("test__1a2b3c4d__template").is_ok());
        assert!(Identifier::parse("tmp$1").is_ok());
    }

    #[test]
    fn test_injection_is_rejected() {
        assert!(Identifier::parse("users; DROP DATABASE prod").is_err());
        assert!(Identifier::parse("a`b").is_err());
        assert!(Identifier::parse("db.table").is_err());
    }

    #[test]
    fn test_length_and_digits() {
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("1234").is_err());
        assert!(Identifier::parse("x".repeat(65)).is_err());
        assert!(Identifier::parse("x".repeat(64)).is_ok());
    }

    #[test]
    fn test_quoting() {
        let db = Identifier::parse("work").unwrap();
        let table = Identifier::parse("todo").unwrap();
        assert_eq!(table.quoted(), "`todo`");
        assert_eq!(Identifier::qualified(&db, &table), "`work`.`todo`");
    }
}

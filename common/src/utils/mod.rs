//! Utility functions and helpers.

pub mod id_generator;
pub mod identifier;

// Re-export commonly used types
pub use id_generator::IdGenerator;
pub use identifier::{Identifier, InvalidIdentifier};

//! Shared building blocks for the Todo service and the test database tooling.

pub mod config;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod telemetry;
pub mod utils;

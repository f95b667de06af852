//! Application configuration.
//!
//! Values come from the process environment (after loading `.env` if one
//! exists) and are validated once at startup. A missing or malformed value
//! aborts the load with `AppError::Config`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use validator::Validate;

use crate::errors::{AppError, AppResult};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_DB_PORT: u16 = 3306;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime environment selected by `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
    Testing,
    E2e,
}

impl AppEnv {
    /// Whether the database settings come from the `APP_TEST_DB_*` variables.
    pub fn uses_test_database(&self) -> bool {
        matches!(self, AppEnv::Testing | AppEnv::E2e)
    }
}

/// Unrecognised names (e.g. `staging`) run with the production settings.
/// Only an empty value is an error.
impl FromStr for AppEnv {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(AppError::Config("APP_ENV is required".into())),
            "development" | "dev" => Ok(AppEnv::Development),
            "production" | "prod" => Ok(AppEnv::Production),
            "testing" | "test" => Ok(AppEnv::Testing),
            "e2e" => Ok(AppEnv::E2e),
            other => {
                tracing::warn!(app_env = other, "Unknown APP_ENV, using production settings");
                Ok(AppEnv::Production)
            }
        }
    }
}

/// Database server settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1, message = "database host is required"))]
    pub host: String,

    #[validate(range(min = 1, message = "database port must be positive"))]
    pub port: u16,

    #[validate(length(min = 1, message = "database user is required"))]
    pub user: String,

    /// Not serialized so the config can be logged.
    #[serde(skip_serializing, default)]
    #[validate(length(min = 1, message = "database password is required"))]
    pub pass: String,

    #[validate(length(min = 1, message = "database name is required"))]
    pub name: String,

    pub ssl: bool,
}

impl DatabaseConfig {
    /// Reads `{prefix}_HOST`, `{prefix}_PORT`, `{prefix}_USER`, `{prefix}_PASS`,
    /// `{prefix}_NAME` and, unless `force_plain` is set, `{prefix}_SSL`.
    pub fn from_lookup<F>(prefix: &str, force_plain: bool, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}")).unwrap_or_default();

        let port = match lookup(&format!("{prefix}_PORT")) {
            Some(raw) if !raw.trim().is_empty() => parse_port(&format!("{prefix}_PORT"), &raw)?,
            _ => DEFAULT_DB_PORT,
        };
        let ssl = !force_plain && parse_flag(&var("SSL"));

        let config = Self {
            host: var("HOST"),
            port,
            user: var("USER"),
            pass: var("PASS"),
            name: var("NAME"),
            ssl,
        };
        config
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Server-level connect options; no default schema is selected.
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let ssl_mode = if self.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Disabled
        };
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.pass)
            .ssl_mode(ssl_mode)
    }

    /// Connect options scoped to the configured application database.
    pub fn app_connect_options(&self) -> MySqlConnectOptions {
        self.connect_options().database(&self.name)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogConfig {
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
}

fn validate_log_level(level: &str) -> Result<(), validator::ValidationError> {
    if LOG_LEVELS.contains(&level) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("log_level"))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    pub env: AppEnv,

    /// Interface the HTTP server binds to.
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, message = "http port must be positive"))]
    pub http_port: u16,

    #[validate(nested)]
    pub database: DatabaseConfig,

    #[validate(nested)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn load() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(AppError::Config(format!("failed to read .env: {e}")));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env: AppEnv = lookup("APP_ENV")
            .ok_or_else(|| AppError::Config("APP_ENV is required".into()))?
            .parse()?;

        let database = if env.uses_test_database() {
            DatabaseConfig::from_lookup("APP_TEST_DB", true, &lookup)?
        } else {
            DatabaseConfig::from_lookup("APP_DB", false, &lookup)?
        };

        let http_port = match lookup("APP_PORT") {
            Some(raw) if !raw.trim().is_empty() => parse_port("APP_PORT", &raw)?,
            _ => DEFAULT_HTTP_PORT,
        };

        let config = Self {
            env,
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port,
            database,
            log: LogConfig {
                level: lookup("LOG_LEVEL")
                    .map(|l| l.to_lowercase())
                    .unwrap_or_else(|| "info".to_string()),
            },
        };
        config
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// `host:port` the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

fn parse_port(key: &str, raw: &str) -> AppResult<u16> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} must be a port number, got '{raw}'")))
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true")
}

//! Configuration for the published-version store.
//!
//! Values come from the environment with defaults, the same way the host
//! services read `DATABASE_URL` and friends:
//!
//! | variable | default |
//! |---|---|
//! | `PUBVER_PUBLISHED_TABLE` | `published_version` |
//! | `PUBVER_PUBLISHED_UK_NAME` | `uk_processor_name_aggregate_root_id` |
//!
//! The table name is spliced into SQL text, so both names are validated as
//! plain SQL identifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TABLE_NAME: &str = "published_version";
pub const DEFAULT_UNIQUE_KEY_NAME: &str = "uk_processor_name_aggregate_root_id";

pub const TABLE_NAME_ENV: &str = "PUBVER_PUBLISHED_TABLE";
pub const UNIQUE_KEY_NAME_ENV: &str = "PUBVER_PUBLISHED_UK_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {field} '{value}': expected an SQL identifier")]
    InvalidIdentifier { field: &'static str, value: String },
}

/// Names of the published-version table and its uniqueness constraint.
///
/// Deserializing goes through [`PublishedVersionStoreConfig::new`], so an invalid
/// name never reaches a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStoreConfig")]
pub struct PublishedVersionStoreConfig {
    table_name: String,
    unique_key_name: String,
}

#[derive(Deserialize)]
struct RawStoreConfig {
    table_name: String,
    unique_key_name: String,
}

impl TryFrom<RawStoreConfig> for PublishedVersionStoreConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStoreConfig) -> Result<Self, Self::Error> {
        Self::new(raw.table_name, raw.unique_key_name)
    }
}

impl Default for PublishedVersionStoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            unique_key_name: DEFAULT_UNIQUE_KEY_NAME.to_string(),
        }
    }
}

impl PublishedVersionStoreConfig {
    pub fn new(
        table_name: impl Into<String>,
        unique_key_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            table_name: table_name.into(),
            unique_key_name: unique_key_name.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `PUBVER_PUBLISHED_TABLE` / `PUBVER_PUBLISHED_UK_NAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let table_name =
            std::env::var(TABLE_NAME_ENV).unwrap_or_else(|_| DEFAULT_TABLE_NAME.to_string());
        let unique_key_name = std::env::var(UNIQUE_KEY_NAME_ENV)
            .unwrap_or_else(|_| DEFAULT_UNIQUE_KEY_NAME.to_string());
        Self::new(table_name, unique_key_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn unique_key_name(&self) -> &str {
        &self.unique_key_name
    }

    /// Validate both names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let table_ok = match self.table_name.split_once('.') {
            Some((schema, table)) => is_identifier(schema) && is_identifier(table),
            None => is_identifier(&self.table_name),
        };
        if !table_ok {
            return Err(ConfigError::InvalidIdentifier {
                field: "table_name",
                value: self.table_name.clone(),
            });
        }
        if !is_identifier(&self.unique_key_name) {
            return Err(ConfigError::InvalidIdentifier {
                field: "unique_key_name",
                value: self.unique_key_name.clone(),
            });
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Manager configuration and connection strings.

use std::path::PathBuf;
use std::time::Duration;

use juego_sql_pool::{PoolConfig, is_memory_database};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable read by [`SqlManager::from_env`](crate::SqlManager::from_env).
pub const CONNECTION_STRING_VAR: &str = "CONNECTION_STRING";

/// Configuration for [`SqlManager`](crate::SqlManager).
///
/// Pool settings are flattened, so a config file can set them next to the manager's own:
///
/// ```
/// use juego_sql::SqlManagerConfig;
///
/// let config: SqlManagerConfig =
///    serde_json::from_str(r#"{ "max_read_connections": 2, "statement_timeout_ms": 500 }"#).unwrap();
/// assert_eq!(config.pool.max_read_connections, 2);
/// assert_eq!(config.pool.idle_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlManagerConfig {
   #[serde(flatten)]
   pub pool: PoolConfig,

   /// Upper bound on each operation, including the wait for a connection
   ///
   /// Default: none
   pub statement_timeout_ms: Option<u64>,
}

impl SqlManagerConfig {
   pub fn statement_timeout(&self) -> Option<Duration> {
      self.statement_timeout_ms.map(Duration::from_millis)
   }
}

/// Keys that mark an ADO-style `key=value;` connection string.
const KEY_VALUE_KEYS: &[&str] = &[
   "datasource",
   "filename",
   "server",
   "host",
   "database",
   "uid",
   "user",
   "userid",
   "password",
   "pwd",
   "port",
];

/// Turn a connection string into a database path.
///
/// Accepted forms:
/// - a plain path, or `:memory:`
/// - a SQLx URL: `sqlite://app.db`, `sqlite:app.db`, `sqlite::memory:` (query options are
///   dropped)
/// - an ADO-style string with a `Data Source` (or `Filename`) key: `Data Source=app.db;`
///
/// Other URL schemes, and key/value strings without a data source (such as a MySQL
/// `Server=...;Database=...` string), are rejected.
pub fn parse_connection_string(input: &str) -> Result<PathBuf> {
   let trimmed = input.trim();
   if trimmed.is_empty() {
      return Err(Error::InvalidConnectionString(
         "connection string is empty".into(),
      ));
   }

   let path = if let Some(rest) = trimmed
      .strip_prefix("sqlite://")
      .or_else(|| trimmed.strip_prefix("sqlite:"))
   {
      rest.split('?').next().unwrap_or_default()
   } else if trimmed.contains("://") {
      return Err(Error::InvalidConnectionString(format!(
         "unsupported scheme in '{trimmed}'"
      )));
   } else if let Some(source) = data_source(trimmed)? {
      source
   } else {
      trimmed
   };

   let path = path.trim();
   if path.is_empty() {
      return Err(Error::InvalidConnectionString(format!(
         "no database path in '{trimmed}'"
      )));
   }

   let path = PathBuf::from(path);
   if is_memory_database(&path) {
      return Ok(PathBuf::from(":memory:"));
   }
   Ok(path)
}

/// `Ok(None)` when `input` is not a key/value connection string.
fn data_source(input: &str) -> Result<Option<&str>> {
   let normalized_key = |key: &str| key.replace(' ', "").to_ascii_lowercase();

   let Some((first_key, _)) = input.split(';').next().and_then(|p| p.split_once('=')) else {
      return Ok(None);
   };
   if !KEY_VALUE_KEYS.contains(&normalized_key(first_key).as_str()) {
      return Ok(None);
   }

   input
      .split(';')
      .filter_map(|part| part.split_once('='))
      .find(|(key, _)| matches!(normalized_key(key).as_str(), "datasource" | "filename"))
      .map(|(_, value)| Some(value))
      .ok_or_else(|| {
         Error::InvalidConnectionString("key/value connection string has no Data Source".into())
      })
}

/// Read a connection string from an environment variable.
pub fn read_connection_string(var: &str) -> Result<String> {
   match std::env::var(var) {
      Ok(value) if !value.trim().is_empty() => Ok(value),
      _ => Err(Error::MissingConnectionString),
   }
}

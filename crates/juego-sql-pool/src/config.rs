//! Configuration for SQLite connection pools

use serde::{Deserialize, Serialize};

/// Configuration for [`ConnectionPool`](crate::ConnectionPool)
///
/// # Examples
///
/// ```
/// use juego_sql_pool::PoolConfig;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_read_connections: 3,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Maximum number of concurrent read connections
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for both read and write connections (in seconds)
   ///
   /// Connections that remain idle for this duration are closed automatically.
   /// Ignored for `:memory:` databases, whose single connection must stay open.
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// How long an acquire waits for a free connection before failing (in seconds)
   ///
   /// Default: 30
   pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout_secs: 30,
         acquire_timeout_secs: 30,
      }
   }
}

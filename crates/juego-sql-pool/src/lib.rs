//! # juego-sql-pool
//!
//! Connection pooling for the `juego-sql` data-access layer, built on SQLx's SQLite driver.
//!
//! ## Core Types
//!
//! - **[`ConnectionPool`]**: Database handle with separate read and write connection pools
//! - **[`PoolConfig`]**: Configuration for connection pool settings
//! - **[`WriteGuard`]**: RAII guard ensuring exclusive write access
//! - **[`PoolStatus`]**: Snapshot of open and idle connections in both pools
//! - **[`Migrator`]**: Re-exported from sqlx for running database migrations
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Connection pooling**: Separate read-only pool and write pool with a max of 1 connection
//! - **Lazy WAL mode**: Write-Ahead Logging enabled automatically on first write
//! - **Exclusive writes**: Single-connection write pool enforces serialized write access
//! - **Concurrent reads**: Multiple readers can query simultaneously via the read pool
//! - **In-memory databases**: `:memory:` has no file to share, so reads are served by the writer
//!
//! ## Usage
//!
//! ```no_run
//! use juego_sql_pool::ConnectionPool;
//!
//! #[tokio::main]
//! async fn main() -> juego_sql_pool::Result<()> {
//!     let pool = ConnectionPool::open("example.db", None).await?;
//!
//!     // Exclusive writer; WAL mode is enabled on first call
//!     let mut writer = pool.acquire_writer().await?;
//!     sqlx::query("INSERT INTO users (name) VALUES (?)")
//!         .bind("Alice")
//!         .execute(&mut *writer)
//!         .await?;
//!     drop(writer);
//!
//!     // Pooled reader
//!     let mut reader = pool.acquire_reader().await?;
//!     let rows = sqlx::query("SELECT * FROM users")
//!         .fetch_all(&mut *reader)
//!         .await?;
//!
//!     pool.close().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod error;
mod pool;
mod write_guard;

pub use config::PoolConfig;
pub use error::Error;
pub use pool::{ConnectionPool, PoolStatus, ReadGuard, is_memory_database};
pub use write_guard::WriteGuard;

// Re-export sqlx migrate types for convenience
pub use sqlx::migrate::Migrator;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for juego-sql-pool

use thiserror::Error;

/// Errors that may occur when opening or using a [`ConnectionPool`](crate::ConnectionPool)
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Migration error from the sqlx migrate framework
   #[error("Migration error: {0}")]
   Migration(#[from] sqlx::migrate::MigrateError),

   /// Pool has been closed and cannot be used
   #[error("Connection pool has been closed")]
   PoolClosed,

   /// No database path was supplied
   #[error("Database path cannot be empty")]
   EmptyPath,
}

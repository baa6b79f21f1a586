//! WriteGuard for exclusive write access to the database

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};

/// RAII guard for exclusive write access to a database connection
///
/// This guard wraps a pool connection and returns it to the pool on drop.
/// Only one `WriteGuard` can exist at a time (enforced by max_connections=1),
/// ensuring serialized write access.
///
/// The guard derefs to `SqliteConnection` allowing direct use with sqlx queries.
#[derive(Debug)]
pub struct WriteGuard {
   conn: PoolConnection<Sqlite>,
}

impl WriteGuard {
   pub(crate) fn new(conn: PoolConnection<Sqlite>) -> Self {
      Self { conn }
   }

   /// Close the underlying connection when this guard drops instead of returning it
   ///
   /// Used when the connection may be left inside an open transaction (e.g. the owning
   /// future was cancelled). SQLite rolls back whatever was pending when the connection
   /// closes, and the pool opens a fresh writer on the next acquire.
   pub fn discard(&mut self) {
      self.conn.close_on_drop();
   }
}

impl Deref for WriteGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for WriteGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}

//! SQLite connection pool with concurrent readers and a single writer

use crate::Result;
use crate::config::PoolConfig;
use crate::error::Error;
use crate::write_guard::WriteGuard;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// Pooled connection used for read queries.
///
/// For file databases this comes from the read-only pool. For `:memory:` databases it is the
/// single writer connection, since every in-memory connection is its own database.
pub type ReadGuard = PoolConnection<Sqlite>;

/// Snapshot of pool occupancy.
///
/// `*_open` counts live connections, `*_idle` counts those sitting in the pool. A connection
/// that is checked out shows up in `open` but not in `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
   pub readers_open: u32,
   pub readers_idle: usize,
   pub writer_open: u32,
   pub writer_idle: usize,
}

impl PoolStatus {
   /// Number of connections currently checked out of either pool
   pub fn in_use(&self) -> usize {
      (self.readers_open as usize).saturating_sub(self.readers_idle)
         + (self.writer_open as usize).saturating_sub(self.writer_idle)
   }
}

/// SQLite database handle with a read pool and a single-connection write pool.
///
/// Reads go through `acquire_reader()`. Writes go through `acquire_writer()`, which lazily
/// switches the database to WAL mode on first use so readers keep working while a writer holds
/// a transaction open.
#[derive(Debug)]
pub struct ConnectionPool {
   /// Read-only connections (defaults to max_connections=6); `None` for `:memory:`
   read_pool: Option<Pool<Sqlite>>,

   /// Single read-write connection (max_connections=1) for serialized writes
   write_pool: Pool<Sqlite>,

   /// Tracks if WAL mode has been initialized (set on first write)
   wal_initialized: AtomicBool,

   /// Marks the pool as closed to prevent further operations
   closed: AtomicBool,

   path: PathBuf,
}

impl ConnectionPool {
   /// Open a database, creating the file if it doesn't exist.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file, or `:memory:`
   /// * `custom_config` - Optional pool configuration. `None` uses [`PoolConfig::default`].
   ///
   /// # Examples
   ///
   /// ```no_run
   /// use juego_sql_pool::{ConnectionPool, PoolConfig};
   ///
   /// # async fn example() -> Result<(), juego_sql_pool::Error> {
   /// let config = PoolConfig {
   ///    max_read_connections: 10,
   ///    ..Default::default()
   /// };
   /// let pool = ConnectionPool::open("app.db", Some(config)).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn open(path: impl AsRef<Path>, custom_config: Option<PoolConfig>) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      if path.as_os_str().is_empty() {
         return Err(Error::EmptyPath);
      }

      let path = path.to_path_buf();
      let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);
      let idle_timeout = Some(Duration::from_secs(config.idle_timeout_secs));

      if is_memory_database(&path) {
         // One connection, kept alive for the lifetime of the pool
         let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(acquire_timeout)
            .connect_with(SqliteConnectOptions::new().filename(&path))
            .await?;

         debug!("Opened in-memory database");

         return Ok(Arc::new(Self {
            read_pool: None,
            write_pool,
            wal_initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            path,
         }));
      }

      // The read pool is read-only and cannot create the file, so create it up front
      if !path.exists() {
         let conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .read_only(false)
            .connect()
            .await?;
         drop(conn);
      }

      let read_pool = SqlitePoolOptions::new()
         .max_connections(config.max_read_connections)
         .min_connections(0)
         .idle_timeout(idle_timeout)
         .acquire_timeout(acquire_timeout)
         .connect_with(SqliteConnectOptions::new().filename(&path).read_only(true))
         .await?;

      let write_pool = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(0)
         .idle_timeout(idle_timeout)
         .acquire_timeout(acquire_timeout)
         .connect_with(SqliteConnectOptions::new().filename(&path).read_only(false))
         .await?;

      debug!("Opened database at {}", path.display());

      Ok(Arc::new(Self {
         read_pool: Some(read_pool),
         write_pool,
         wal_initialized: AtomicBool::new(false),
         closed: AtomicBool::new(false),
         path,
      }))
   }

   /// Path this pool was opened with
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Acquire a pooled connection for read queries
   pub async fn acquire_reader(&self) -> Result<ReadGuard> {
      self.ensure_open()?;

      match &self.read_pool {
         Some(pool) => Ok(pool.acquire().await?),
         None => Ok(self.write_pool.acquire().await?),
      }
   }

   /// Acquire exclusive write access to the database
   ///
   /// On the first call this enables WAL mode. Subsequent calls reuse the same
   /// write connection. The guard returns the connection to the pool on drop.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      self.ensure_open()?;

      let mut conn = self.write_pool.acquire().await?;

      if self.read_pool.is_some() && !self.wal_initialized.load(Ordering::SeqCst) {
         sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;

         // https://www.sqlite.org/wal.html#performance_considerations
         sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&mut *conn)
            .await?;

         self.wal_initialized.store(true, Ordering::SeqCst);
      }

      Ok(WriteGuard::new(conn))
   }

   /// Current occupancy of both pools
   pub fn status(&self) -> PoolStatus {
      let (readers_open, readers_idle) = match &self.read_pool {
         Some(pool) => (pool.size(), pool.num_idle()),
         None => (0, 0),
      };

      PoolStatus {
         readers_open,
         readers_idle,
         writer_open: self.write_pool.size(),
         writer_idle: self.write_pool.num_idle(),
      }
   }

   /// Run all pending migrations on the write connection
   ///
   /// SQLx records applied migrations, so calling this repeatedly is safe.
   pub async fn run_migrations(&self, migrator: &sqlx::migrate::Migrator) -> Result<()> {
      let mut writer = self.acquire_writer().await?;
      migrator.run(&mut *writer).await?;
      Ok(())
   }

   /// Close all connections
   ///
   /// Awaits every checked-out reader, checkpoints the WAL, then closes the writer.
   /// Any later call returns `Error::PoolClosed`.
   pub async fn close(self: Arc<Self>) -> Result<()> {
      self.closed.store(true, Ordering::SeqCst);

      if let Some(pool) = &self.read_pool {
         pool.close().await;
      }

      if self.wal_initialized.load(Ordering::SeqCst)
         && let Ok(mut conn) = self.write_pool.acquire().await
         && let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await
      {
         error!("WAL checkpoint failed on close: {}", e);
      }

      self.write_pool.close().await;

      Ok(())
   }

   /// Close the pool and delete the database file along with its WAL and SHM files
   pub async fn remove(self: Arc<Self>) -> Result<()> {
      let path = self.path.clone();
      let in_memory = is_memory_database(&path);

      self.close().await?;

      if in_memory {
         return Ok(());
      }

      std::fs::remove_file(&path)?;

      // These only exist if WAL was ever initialized
      for sidecar in [wal_path(&path), shm_path(&path)] {
         if let Err(e) = std::fs::remove_file(&sidecar)
            && e.kind() != std::io::ErrorKind::NotFound
         {
            return Err(Error::Io(e));
         }
      }

      Ok(())
   }

   fn ensure_open(&self) -> Result<()> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::PoolClosed);
      }
      Ok(())
   }
}

/// True for SQLite's in-memory database names (`:memory:` and `file::memory:` URIs)
pub fn is_memory_database(path: &Path) -> bool {
   let s = path.to_string_lossy();
   s == ":memory:" || s.starts_with("file::memory:") || s.contains("mode=memory")
}

fn wal_path(path: &Path) -> PathBuf {
   let mut s = path.as_os_str().to_owned();
   s.push("-wal");
   PathBuf::from(s)
}

fn shm_path(path: &Path) -> PathBuf {
   let mut s = path.as_os_str().to_owned();
   s.push("-shm");
   PathBuf::from(s)
}

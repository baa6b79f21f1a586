use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use juego_sql_pool::{ConnectionPool, Migrator, PoolStatus};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::Row;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::builders::{ExecuteBuilder, QueryBuilder, QueryOneBuilder};
use crate::clause::{UPDATE_PREFIX, WHERE_PREFIX, compile_set, compile_where};
use crate::config::{CONNECTION_STRING_VAR, SqlManagerConfig, parse_connection_string, read_connection_string};
use crate::decode::{JsonRow, decode_row, deserialize_plain, short_type_name};
use crate::entity::{Entity, EntityMap, EntityRegistry};
use crate::executor::{Access, Fetch, Statement};
use crate::operation::{Changes, Filter, Values};
use crate::params::{ParamValue, Params};
use crate::table::Table;
use crate::transactions::{ActiveTransaction, TransactionScope, TransactionWriter};
use crate::{Error, Result};

/// Entry point for data access on one SQLite database.
///
/// Cloning is cheap: clones share the connection pool, the entity registry and the
/// transaction identity, so an operation on any clone joins a transaction opened on
/// another clone by the same task.
///
/// # Examples
///
/// ```no_run
/// use juego_sql::{Column, Entity, Filter, SqlManager, Values};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///    id: i64,
///    name: String,
/// }
///
/// impl Entity for User {
///    const TABLE: &'static str = "users";
///    const COLUMNS: &'static [Column] = &[Column::new("id").generated(), Column::new("name")];
/// }
///
/// # async fn example() -> juego_sql::Result<()> {
/// let db = SqlManager::connect("app.db", None).await?;
/// db.register::<User>()?;
///
/// let id = db.insert::<User>(Values::new().set("name", "alice")).await?;
/// let user = db.find_one::<User>(Filter::new().eq("id", id)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqlManager {
   pub(crate) inner: Arc<ConnectionPool>,
   registry: Arc<EntityRegistry>,
   pub(crate) id: Uuid,
   pub(crate) timeout: Option<Duration>,
}

impl SqlManager {
   /// Open the database at `path` (or `:memory:`), creating the file if needed.
   pub async fn connect(path: impl AsRef<Path>, config: Option<SqlManagerConfig>) -> Result<Self> {
      let config = config.unwrap_or_default();
      let pool = ConnectionPool::open(path, Some(config.pool.clone())).await?;

      Ok(Self {
         inner: pool,
         registry: Arc::new(EntityRegistry::default()),
         id: Uuid::new_v4(),
         timeout: config.statement_timeout(),
      })
   }

   /// Open the database named by a connection string.
   ///
   /// See [`parse_connection_string`](crate::config::parse_connection_string) for the
   /// accepted forms.
   pub async fn from_connection_string(
      connection_string: &str,
      config: Option<SqlManagerConfig>,
   ) -> Result<Self> {
      let path = parse_connection_string(connection_string)?;
      Self::connect(path, config).await
   }

   /// Open the database named by the `CONNECTION_STRING` environment variable.
   pub async fn from_env(config: Option<SqlManagerConfig>) -> Result<Self> {
      let connection_string = read_connection_string(CONNECTION_STRING_VAR)?;
      Self::from_connection_string(&connection_string, config).await
   }

   /// A handle whose operations fail with [`Error::Timeout`] after `limit`.
   ///
   /// The returned handle shares the pool, registry and transaction identity with `self`.
   /// An expired operation is cancelled: a running statement is interrupted inside SQLite
   /// and its connection released. For [`transaction`](Self::transaction) the limit covers
   /// acquiring the writer and beginning.
   pub fn with_timeout(&self, limit: Duration) -> Self {
      Self {
         timeout: Some(limit),
         ..self.clone()
      }
   }

   /// Build the column map for `T`.
   ///
   /// Returns `Ok(false)` if `T` was already registered. Fails if the entity declares an
   /// empty table name or a column name that is not a plain identifier.
   pub fn register<T: Entity>(&self) -> Result<bool> {
      let added = self.registry.register::<T>()?;
      if added {
         debug!("Registered entity {} for table {}", short_type_name::<T>(), T::TABLE);
      }
      Ok(added)
   }

   /// Typed facade over this manager's CRUD operations for `T`.
   pub fn table<T: Entity>(&self) -> Table<T> {
      Table::new(self.clone())
   }

   /// Path of the underlying database
   pub fn path(&self) -> &Path {
      self.inner.path()
   }

   /// Current occupancy of the read and write pools
   pub fn pool_status(&self) -> PoolStatus {
      self.inner.status()
   }

   /// First row matching `filter`, or `None`.
   pub async fn find_one<T: Entity>(&self, filter: Filter) -> Result<Option<T>> {
      let operation = format!("FindOne<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            let statement = select_statement(&map, filter, Some(1))?;
            let row = self.run(Access::Read, statement, Fetch::First).await?.first()?;
            row.map(|row| map.from_row::<T>(decode_row(&row)?)).transpose()
         })
         .await
   }

   /// Every row matching `filter`. An empty filter returns the whole table.
   pub async fn find_all<T: Entity>(&self, filter: Filter) -> Result<Vec<T>> {
      let operation = format!("FindAll<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            let statement = select_statement(&map, filter, None)?;
            let rows = self.run(Access::Read, statement, Fetch::All).await?.rows()?;
            rows
               .iter()
               .map(|row| map.from_row(decode_row(row)?))
               .collect::<Result<Vec<T>>>()
         })
         .await
   }

   /// Insert one row built from `values` and return its generated row id.
   ///
   /// The keys of `values` are the column list. With no keys the row gets every column's
   /// default.
   pub async fn insert<T: Entity>(&self, values: Values) -> Result<i64> {
      let operation = format!("Insert<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            let columns = map.resolve_values(values)?;
            self.insert_row(&map, columns).await
         })
         .await
   }

   /// Insert an entity's declared columns (generated columns excluded) and return the
   /// generated row id.
   pub async fn insert_entity<T: Entity>(&self, entity: &T) -> Result<i64> {
      let operation = format!("Insert<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            let columns = map.insert_values(entity)?;
            self.insert_row(&map, columns).await
         })
         .await
   }

   /// Insert entities one at a time, in order, returning their row ids.
   ///
   /// Stops at the first failure. Rows inserted before it stay unless the call runs inside
   /// [`transaction`](Self::transaction).
   pub async fn insert_all<T: Entity>(&self, entities: &[T]) -> Result<Vec<i64>> {
      let mut ids = Vec::with_capacity(entities.len());
      for entity in entities {
         ids.push(self.insert_entity(entity).await?);
      }
      Ok(ids)
   }

   /// Insert entities with one multi-row statement, returning the number of rows inserted.
   pub async fn insert_batch<T: Entity>(&self, entities: &[T]) -> Result<u64> {
      let operation = format!("InsertBatch<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            if entities.is_empty() {
               return Ok(0);
            }

            let mut columns = Vec::new();
            let mut rows = Vec::with_capacity(entities.len());
            let mut values = Vec::new();
            for entity in entities {
               let row = map.insert_values(entity)?;
               if columns.is_empty() {
                  columns = row.iter().map(|(column, _)| *column).collect();
               }
               rows.push(format!("({})", vec!["?"; row.len()].join(", ")));
               values.extend(row.into_iter().map(|(_, value)| value));
            }

            if columns.is_empty() {
               // Every declared column is generated, so each entity is a DEFAULT VALUES row
               let mut inserted = 0;
               for _ in entities {
                  let sql = format!("INSERT INTO {} DEFAULT VALUES", map.table());
                  inserted += self.execute_positional(sql, Vec::new()).await?;
               }
               return Ok(inserted);
            }

            let sql = format!(
               "INSERT INTO {} ({}) VALUES {}",
               map.table(),
               columns.join(", "),
               rows.join(", ")
            );
            self.execute_positional(sql, values).await
         })
         .await
   }

   /// Apply `changes` to every row matching `filter` and return the number of rows changed.
   ///
   /// ```no_run
   /// # use juego_sql::{Changes, Filter, Mutation, SqlManager};
   /// # use juego_sql::Column;
   /// # #[derive(serde::Serialize, serde::Deserialize)] struct Product { id: i64, stock: i64 }
   /// # impl juego_sql::Entity for Product {
   /// #    const TABLE: &'static str = "products";
   /// #    const COLUMNS: &'static [Column] = &[Column::new("id"), Column::new("stock")];
   /// # }
   /// # async fn example(db: &SqlManager) -> juego_sql::Result<()> {
   /// db.update::<Product>(
   ///    Filter::new().eq("id", 7),
   ///    Changes::new().with("stock", Mutation::Decrement(1)),
   /// )
   /// .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn update<T: Entity>(&self, filter: Filter, changes: Changes) -> Result<u64> {
      let operation = format!("Update<{}>", short_type_name::<T>());
      self
         .instrumented(operation, async {
            let map = self.registry.get::<T>()?;
            let assignments = map.resolve_changes(changes)?;
            let conditions = map.resolve_filter(filter)?;

            let set = compile_set(assignments.iter().map(|(c, m)| (*c, m)), UPDATE_PREFIX)?;
            let wheres = compile_where(conditions.iter().map(|(c, p)| (*c, p)), WHERE_PREFIX);

            let sql = format!("UPDATE {} SET {} WHERE {}", map.table(), set.sql, wheres.sql);
            let mut params = set.params;
            params.extend(wheres.params);

            let statement = Statement::named(&sql, &params)?;
            let result = self.run(Access::Write, statement, Fetch::Execute).await?.done()?;
            Ok::<_, Error>(result.rows_affected())
         })
         .await
   }

   /// Raw query returning every row as `T`.
   ///
   /// ```no_run
   /// # async fn example(db: &juego_sql::SqlManager) -> juego_sql::Result<()> {
   /// let names: Vec<String> = db
   ///    .query("SELECT name FROM users WHERE status = @status AND id IN @ids")
   ///    .bind("status", 1)
   ///    .bind_list("ids", [1, 2, 3])
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub fn query<T>(&self, sql: impl Into<String>) -> QueryBuilder<T>
   where
      T: DeserializeOwned + Send + 'static,
   {
      QueryBuilder::new(self.clone(), sql.into())
   }

   /// Raw query returning the first row as `T`, or `None`.
   pub fn query_one<T>(&self, sql: impl Into<String>) -> QueryOneBuilder<T>
   where
      T: DeserializeOwned + Send + 'static,
   {
      QueryOneBuilder::new(self.clone(), sql.into())
   }

   /// Raw statement returning the number of rows affected.
   pub fn execute(&self, sql: impl Into<String>) -> ExecuteBuilder {
      ExecuteBuilder::new(self.clone(), sql.into())
   }

   /// Run `action` inside a database transaction.
   ///
   /// Every operation issued while `action` runs, on this manager or any clone of it and at
   /// any call depth in the same task, uses the transaction's connection. If `action`
   /// returns `Ok` the transaction commits. If it returns an error the transaction rolls
   /// back and the call fails with [`Error::TransactionFailed`], whose `source` is the
   /// original error. If it panics the transaction rolls back and the panic resumes.
   ///
   /// Calling `transaction` while one is already open joins it: `action` runs directly and
   /// its result is returned unchanged; the outermost call commits or rolls back.
   ///
   /// ```no_run
   /// # use juego_sql::{Filter, SqlManager, Values, Changes, Mutation};
   /// # use juego_sql::Column;
   /// # #[derive(serde::Serialize, serde::Deserialize)] struct Order { id: i64, product_id: i64 }
   /// # impl juego_sql::Entity for Order {
   /// #    const TABLE: &'static str = "orders";
   /// #    const COLUMNS: &'static [Column] = &[Column::new("id").generated(), Column::new("product_id")];
   /// # }
   /// # #[derive(serde::Serialize, serde::Deserialize)] struct Product { id: i64, stock: i64 }
   /// # impl juego_sql::Entity for Product {
   /// #    const TABLE: &'static str = "products";
   /// #    const COLUMNS: &'static [Column] = &[Column::new("id"), Column::new("stock")];
   /// # }
   /// # async fn example(db: &SqlManager) -> juego_sql::Result<()> {
   /// let order_id = db
   ///    .transaction(|| async {
   ///       let id = db.insert::<Order>(Values::new().set("product_id", 7)).await?;
   ///       db.update::<Product>(
   ///          Filter::new().eq("id", 7),
   ///          Changes::new().with("stock", Mutation::Decrement(1)),
   ///       )
   ///       .await?;
   ///       Ok(id)
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn transaction<F, Fut, R>(&self, action: F) -> Result<R>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<R>>,
   {
      if crate::transactions::current(self.id).is_some() {
         debug!("Joining the open transaction");
         return action().await;
      }

      let started = Instant::now();
      let begin = async { TransactionWriter::begin(self.inner.acquire_writer().await?).await };
      let writer = match self.timeout {
         Some(limit) => match tokio::time::timeout(limit, begin).await {
            Ok(writer) => writer?,
            Err(_) => {
               let e = Error::Timeout {
                  operation: "Transaction".to_string(),
                  elapsed_ms: started.elapsed().as_millis(),
               };
               error!(
                  operation = "Transaction",
                  elapsed_ms = started.elapsed().as_millis() as u64,
                  error = %e,
                  "Transaction could not start"
               );
               return Err(e);
            }
         },
         None => begin.await?,
      };
      let active = Arc::new(ActiveTransaction::new(self.id, writer));
      let transaction_id = active.transaction_id();
      debug!(%transaction_id, "Transaction started");

      let scope = TransactionScope::current_with(Arc::clone(&active));
      let outcome = AssertUnwindSafe(scope.run(async move { action().await }))
         .catch_unwind()
         .await;

      let writer = active.take().await?;
      let elapsed_ms = started.elapsed().as_millis() as u64;

      match outcome {
         Ok(Ok(value)) => match writer.commit().await {
            Ok(()) => {
               info!(operation = "Transaction", %transaction_id, elapsed_ms, "Transaction committed");
               Ok(value)
            }
            Err(e) => {
               error!(operation = "Transaction", %transaction_id, elapsed_ms, error = %e, "Commit failed");
               Err(Error::TransactionFailed {
                  source: Box::new(e),
               })
            }
         },
         Ok(Err(e)) => {
            error!(
               operation = "Transaction",
               %transaction_id,
               elapsed_ms,
               error = %e,
               "Transaction failed, rolling back"
            );
            match writer.rollback().await {
               Ok(()) => Err(Error::TransactionFailed {
                  source: Box::new(e),
               }),
               Err(rollback_err) => Err(Error::TransactionRollbackFailed {
                  transaction_error: e.to_string(),
                  rollback_error: rollback_err.to_string(),
               }),
            }
         }
         Err(panic) => {
            error!(operation = "Transaction", %transaction_id, elapsed_ms, "Transaction panicked, rolling back");
            if let Err(e) = writer.rollback().await {
               error!("Rollback after panic failed: {}", e);
            }
            std::panic::resume_unwind(panic)
         }
      }
   }

   /// Run database migrations
   ///
   /// Runs all pending migrations from the provided migrator.
   /// SQLx tracks applied migrations, so this is safe to call multiple times.
   pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
      self.inner.run_migrations(migrator).await?;
      Ok(())
   }

   /// Close the database connection.
   ///
   /// Checkpoints the WAL and closes both pools. Clones of this manager fail with a pool
   /// closed error afterwards.
   pub async fn close(self) -> Result<()> {
      self.inner.close().await?;
      Ok(())
   }

   /// Close the database connection and remove the database, WAL and SHM files.
   pub async fn remove(self) -> Result<()> {
      self.inner.remove().await?;
      Ok(())
   }

   /// Insert one row and read its rowid back from the statement itself.
   ///
   /// A `WITHOUT ROWID` table has no rowid to return, so SQLite rejects the statement.
   async fn insert_row(&self, map: &EntityMap, columns: Vec<(&'static str, JsonValue)>) -> Result<i64> {
      let statement = if columns.is_empty() {
         Statement::positional(
            format!("INSERT INTO {} DEFAULT VALUES RETURNING rowid", map.table()),
            Vec::new(),
         )
      } else {
         let names: Vec<&str> = columns.iter().map(|(column, _)| *column).collect();
         let placeholders: Vec<String> = names.iter().map(|name| format!("@{name}")).collect();
         let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING rowid",
            map.table(),
            names.join(", "),
            placeholders.join(", ")
         );

         let mut params = Params::new();
         for (column, value) in columns {
            params.insert(column, ParamValue::Scalar(value));
         }
         Statement::named(&sql, &params)?
      };

      let row = self.run(Access::Write, statement, Fetch::First).await?.first()?;
      let row = row.ok_or_else(|| Error::NoGeneratedKey(map.table().to_string()))?;
      Ok(row.try_get::<i64, _>(0)?)
   }

   async fn execute_positional(&self, sql: String, values: Vec<JsonValue>) -> Result<u64> {
      let statement = Statement::positional(sql, values);
      let result = self.run(Access::Write, statement, Fetch::Execute).await?.done()?;
      Ok(result.rows_affected())
   }

   /// Map decoded rows to `T`, through its entity map when `T` is registered.
   pub(crate) fn rows_as<T: DeserializeOwned + 'static>(&self, rows: Vec<JsonRow>) -> Result<Vec<T>> {
      match self.registry.find(TypeId::of::<T>()) {
         Some(map) => rows.into_iter().map(|row| map.from_row(row)).collect(),
         None => rows.into_iter().map(deserialize_plain).collect(),
      }
   }
}

fn select_statement(map: &EntityMap, filter: Filter, limit: Option<u32>) -> Result<Statement> {
   let conditions = map.resolve_filter(filter)?;
   let clause = compile_where(conditions.iter().map(|(c, p)| (*c, p)), "");

   let mut sql = format!("SELECT * FROM {} WHERE {}", map.table(), clause.sql);
   if let Some(limit) = limit {
      sql.push_str(&format!(" LIMIT {limit}"));
   }
   Statement::named(&sql, &clause.params)
}

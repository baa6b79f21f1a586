//! Builders for raw SQL operations with named parameters

use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::decode::{decode_row, short_type_name};
use crate::executor::{Access, Fetch, Statement};
use crate::manager::SqlManager;
use crate::params::Params;
use crate::{Error, Result};

macro_rules! param_methods {
   () => {
      /// Bind a scalar value to `@name`.
      pub fn bind(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
         self.params = self.params.bind(name, value);
         self
      }

      /// Bind a collection to `@name`, expanded for `IN @name`.
      pub fn bind_list<I>(mut self, name: impl Into<String>, values: I) -> Self
      where
         I: IntoIterator,
         I::Item: Into<JsonValue>,
      {
         self.params = self.params.bind_list(name, values);
         self
      }

      /// Add a prepared parameter set, replacing parameters with the same name.
      pub fn params(mut self, params: Params) -> Self {
         self.params.extend(params);
         self
      }
   };
}

/// Builder for SELECT queries returning every row as `T`
///
/// Awaiting the builder runs the query.
#[must_use = "queries do nothing unless awaited"]
pub struct QueryBuilder<T> {
   db: SqlManager,
   sql: String,
   params: Params,
   _row: PhantomData<fn() -> T>,
}

impl<T> QueryBuilder<T>
where
   T: DeserializeOwned + Send + 'static,
{
   pub(crate) fn new(db: SqlManager, sql: String) -> Self {
      Self {
         db,
         sql,
         params: Params::new(),
         _row: PhantomData,
      }
   }

   param_methods!();

   /// Execute the query and return all rows
   pub async fn execute(self) -> Result<Vec<T>> {
      let operation = format!("Query<{}>", short_type_name::<T>());
      let db = &self.db;
      db.instrumented(operation, async {
         let statement = Statement::named(&self.sql, &self.params)?;
         let rows = db.run(Access::Read, statement, Fetch::All).await?.rows()?;
         let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
         db.rows_as::<T>(decoded)
      })
      .await
   }
}

impl<T> IntoFuture for QueryBuilder<T>
where
   T: DeserializeOwned + Send + 'static,
{
   type Output = Result<Vec<T>>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Builder for SELECT queries returning the first row as `T`
///
/// Rows after the first are ignored.
#[must_use = "queries do nothing unless awaited"]
pub struct QueryOneBuilder<T> {
   db: SqlManager,
   sql: String,
   params: Params,
   _row: PhantomData<fn() -> T>,
}

impl<T> QueryOneBuilder<T>
where
   T: DeserializeOwned + Send + 'static,
{
   pub(crate) fn new(db: SqlManager, sql: String) -> Self {
      Self {
         db,
         sql,
         params: Params::new(),
         _row: PhantomData,
      }
   }

   param_methods!();

   /// Execute the query and return zero or one row
   pub async fn execute(self) -> Result<Option<T>> {
      let operation = format!("QueryOne<{}>", short_type_name::<T>());
      let db = &self.db;
      db.instrumented(operation, async {
         let statement = Statement::named(&self.sql, &self.params)?;
         let Some(row) = db.run(Access::Read, statement, Fetch::First).await?.first()? else {
            return Ok(None);
         };
         let decoded = decode_row(&row)?;
         Ok::<_, Error>(db.rows_as::<T>(vec![decoded])?.pop())
      })
      .await
   }
}

impl<T> IntoFuture for QueryOneBuilder<T>
where
   T: DeserializeOwned + Send + 'static,
{
   type Output = Result<Option<T>>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Builder for write statements (INSERT/UPDATE/DELETE/DDL)
///
/// Awaiting the builder returns the number of rows affected.
#[must_use = "statements do nothing unless awaited"]
pub struct ExecuteBuilder {
   db: SqlManager,
   sql: String,
   params: Params,
}

impl ExecuteBuilder {
   pub(crate) fn new(db: SqlManager, sql: String) -> Self {
      Self {
         db,
         sql,
         params: Params::new(),
      }
   }

   param_methods!();

   /// Execute the write operation
   pub async fn execute(self) -> Result<u64> {
      let db = &self.db;
      db.instrumented("Execute".to_string(), async {
         let statement = Statement::named(&self.sql, &self.params)?;
         let result = db.run(Access::Write, statement, Fetch::Execute).await?.done()?;
         Ok::<_, Error>(result.rows_affected())
      })
      .await
   }
}

impl IntoFuture for ExecuteBuilder {
   type Output = Result<u64>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

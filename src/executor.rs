//! Statement execution: connection selection, timing and logging.

use std::time::Instant;

use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult, SqliteRow};
use tracing::{debug, error, info};

use crate::manager::SqlManager;
use crate::params::{Params, bind_value, expand};
use crate::transactions;
use crate::{Error, Result};

tokio::task_local! {
   static DEADLINE: Instant;
}

/// VM instructions between deadline checks while a statement runs.
const PROGRESS_INTERVAL: i32 = 1_000;

/// SQLite result code for a statement stopped by the progress handler.
const SQLITE_INTERRUPT: &str = "9";

/// Which pool serves a statement when no transaction is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
   Read,
   Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fetch {
   All,
   First,
   Execute,
}

pub(crate) enum Outcome {
   Rows(Vec<SqliteRow>),
   Row(Option<SqliteRow>),
   Done(SqliteQueryResult),
}

impl Outcome {
   pub(crate) fn rows(self) -> Result<Vec<SqliteRow>> {
      match self {
         Outcome::Rows(rows) => Ok(rows),
         Outcome::Row(row) => Ok(row.into_iter().collect()),
         Outcome::Done(_) => Err(Error::Other("statement was executed, not fetched".into())),
      }
   }

   pub(crate) fn first(self) -> Result<Option<SqliteRow>> {
      match self {
         Outcome::Rows(rows) => Ok(rows.into_iter().next()),
         Outcome::Row(row) => Ok(row),
         Outcome::Done(_) => Err(Error::Other("statement was executed, not fetched".into())),
      }
   }

   pub(crate) fn done(self) -> Result<SqliteQueryResult> {
      match self {
         Outcome::Done(result) => Ok(result),
         _ => Err(Error::Other("statement was fetched, not executed".into())),
      }
   }
}

/// SQL with positional placeholders and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
   pub(crate) sql: String,
   pub(crate) values: Vec<JsonValue>,
}

impl Statement {
   /// Rewrite `@name` placeholders using `params`.
   pub(crate) fn named(sql: &str, params: &Params) -> Result<Self> {
      let (sql, values) = expand(sql, params)?;
      Ok(Self { sql, values })
   }

   pub(crate) fn positional(sql: String, values: Vec<JsonValue>) -> Self {
      Self { sql, values }
   }
}

impl SqlManager {
   /// Run one named operation: apply the manager's timeout, then log the outcome with its
   /// elapsed time. Errors are returned unchanged.
   ///
   /// With a timeout, statements issued by `fut` are interrupted inside SQLite once the
   /// deadline passes, so a timed-out write is not committed after the caller gave up on it.
   pub(crate) async fn instrumented<R, Fut>(&self, operation: String, fut: Fut) -> Result<R>
   where
      Fut: Future<Output = Result<R>>,
   {
      let started = Instant::now();
      let timed_out = |operation: &String| Error::Timeout {
         operation: operation.clone(),
         elapsed_ms: started.elapsed().as_millis(),
      };

      let result = match self.timeout {
         Some(limit) => match tokio::time::timeout(limit, DEADLINE.scope(started + limit, fut)).await {
            Ok(Err(e)) if is_interrupt(&e) => Err(timed_out(&operation)),
            Ok(result) => result,
            Err(_) => Err(timed_out(&operation)),
         },
         None => fut.await,
      };

      let elapsed_ms = started.elapsed().as_millis() as u64;
      match &result {
         Ok(_) => info!(operation = %operation, elapsed_ms, "operation completed"),
         Err(e) => error!(operation = %operation, elapsed_ms, error = %e, "operation failed"),
      }

      result
   }

   /// Execute a statement on the open transaction's connection, or on a pooled one.
   ///
   /// A pooled connection is returned when this future completes or is dropped.
   pub(crate) async fn run(&self, access: Access, statement: Statement, fetch: Fetch) -> Result<Outcome> {
      debug!(sql = %statement.sql, params = statement.values.len(), "executing statement");
      let deadline = DEADLINE.try_with(|deadline| *deadline).ok();

      if let Some(tx) = transactions::current(self.id) {
         let mut lock = tx.lock().await?;
         return run_on(lock.connection()?, statement, fetch, deadline).await;
      }

      let acquire_started = Instant::now();
      match access {
         Access::Read => {
            let mut conn = self.inner.acquire_reader().await?;
            debug!(acquire_ms = elapsed_ms(acquire_started), "Acquired reader connection");
            run_on(&mut conn, statement, fetch, deadline).await
         }
         Access::Write => {
            let mut writer = self.inner.acquire_writer().await?;
            debug!(acquire_ms = elapsed_ms(acquire_started), "Acquired writer connection");
            run_on(&mut writer, statement, fetch, deadline).await
         }
      }
   }
}

/// Install (or clear, with `None`) the interrupt that stops statements on `conn` past
/// `deadline`.
///
/// A statement abandoned by a dropped future keeps running on the connection's worker until
/// the handler stops it; every later use of the connection replaces the handler first.
pub(crate) async fn set_deadline(conn: &mut SqliteConnection, deadline: Option<Instant>) -> Result<()> {
   let mut handle = conn.lock_handle().await?;
   match deadline {
      Some(deadline) => handle.set_progress_handler(PROGRESS_INTERVAL, move || Instant::now() < deadline),
      None => handle.remove_progress_handler(),
   }
   Ok(())
}

fn is_interrupt(error: &Error) -> bool {
   match error {
      Error::Sqlx(sqlx::Error::Database(db)) => db.code().as_deref() == Some(SQLITE_INTERRUPT),
      _ => false,
   }
}

fn elapsed_ms(since: Instant) -> u64 {
   since.elapsed().as_millis() as u64
}

async fn run_on(
   conn: &mut SqliteConnection,
   statement: Statement,
   fetch: Fetch,
   deadline: Option<Instant>,
) -> Result<Outcome> {
   set_deadline(conn, deadline).await?;

   let mut query = sqlx::query(&statement.sql);
   for value in statement.values {
      query = bind_value(query, value);
   }

   Ok(match fetch {
      Fetch::All => Outcome::Rows(query.fetch_all(&mut *conn).await?),
      Fetch::First => Outcome::Row(query.fetch_optional(&mut *conn).await?),
      Fetch::Execute => Outcome::Done(query.execute(&mut *conn).await?),
   })
}

//! Ambient transaction context.
//!
//! [`SqlManager::transaction`](crate::SqlManager::transaction) opens the writer, begins an
//! immediate transaction and runs its body inside a task-local scope. Any operation issued
//! from that body (at any call depth, across `.await` points) finds the open transaction
//! here and runs on its connection instead of acquiring a new one.
//!
//! The scope belongs to the task: work moved to another task with `tokio::spawn` does not
//! see it.

use std::sync::Arc;

use juego_sql_pool::WriteGuard;
use sqlx::sqlite::SqliteConnection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::executor::set_deadline;
use crate::{Error, Result};

tokio::task_local! {
   static CURRENT: TransactionScope;
}

/// Writer connection with an open `BEGIN IMMEDIATE` transaction.
///
/// If it is dropped before `commit` or `rollback`, the connection is discarded instead of
/// returned to the pool, so SQLite rolls the transaction back when it closes.
#[derive(Debug)]
pub(crate) struct TransactionWriter {
   guard: WriteGuard,
   open: bool,
}

impl TransactionWriter {
   /// Begin an immediate transaction on `guard`.
   ///
   /// The writer counts as open from the start, so a caller that drops this future while
   /// `BEGIN` is in flight discards the connection rather than pooling it mid-transaction.
   pub(crate) async fn begin(guard: WriteGuard) -> Result<Self> {
      let mut writer = Self { guard, open: true };
      if let Err(e) = writer.execute("BEGIN IMMEDIATE").await {
         writer.open = false;
         return Err(e);
      }
      Ok(writer)
   }

   pub(crate) fn connection(&mut self) -> &mut SqliteConnection {
      &mut self.guard
   }

   pub(crate) async fn commit(mut self) -> Result<()> {
      self.execute("COMMIT").await?;
      self.open = false;
      Ok(())
   }

   pub(crate) async fn rollback(mut self) -> Result<()> {
      self.execute("ROLLBACK").await?;
      self.open = false;
      Ok(())
   }

   // Control statements never run under an operation deadline.
   async fn execute(&mut self, sql: &str) -> Result<()> {
      set_deadline(&mut self.guard, None).await?;
      sqlx::query(sql).execute(&mut *self.guard).await?;
      Ok(())
   }
}

impl Drop for TransactionWriter {
   fn drop(&mut self) {
      if self.open {
         debug!("Discarding writer with an unfinished transaction");
         self.guard.discard();
      }
   }
}

/// Transaction open on one manager's database.
#[derive(Debug)]
pub(crate) struct ActiveTransaction {
   manager_id: Uuid,
   transaction_id: Uuid,
   writer: Mutex<Option<TransactionWriter>>,
}

impl ActiveTransaction {
   pub(crate) fn new(manager_id: Uuid, writer: TransactionWriter) -> Self {
      Self {
         manager_id,
         transaction_id: Uuid::new_v4(),
         writer: Mutex::new(Some(writer)),
      }
   }

   pub(crate) fn transaction_id(&self) -> Uuid {
      self.transaction_id
   }

   /// Lock the transaction's connection; statements run one at a time in call order.
   pub(crate) async fn lock(&self) -> Result<WriterLock<'_>> {
      let guard = self.writer.lock().await;
      if guard.is_none() {
         return Err(Error::TransactionAlreadyFinalized);
      }
      Ok(WriterLock(guard))
   }

   /// Remove the writer so it can be committed or rolled back.
   pub(crate) async fn take(&self) -> Result<TransactionWriter> {
      self
         .writer
         .lock()
         .await
         .take()
         .ok_or(Error::TransactionAlreadyFinalized)
   }
}

/// Locked access to the connection of an [`ActiveTransaction`].
pub(crate) struct WriterLock<'a>(MutexGuard<'a, Option<TransactionWriter>>);

impl WriterLock<'_> {
   pub(crate) fn connection(&mut self) -> Result<&mut SqliteConnection> {
      self
         .0
         .as_mut()
         .map(TransactionWriter::connection)
         .ok_or(Error::TransactionAlreadyFinalized)
   }
}

/// Transactions visible to the current task, innermost last.
#[derive(Debug, Clone, Default)]
pub(crate) struct TransactionScope(Vec<Arc<ActiveTransaction>>);

impl TransactionScope {
   fn find(&self, manager_id: Uuid) -> Option<Arc<ActiveTransaction>> {
      self
         .0
         .iter()
         .rev()
         .find(|tx| tx.manager_id == manager_id)
         .cloned()
   }

   /// The current task's scope with `tx` added.
   pub(crate) fn current_with(tx: Arc<ActiveTransaction>) -> Self {
      let mut scope = CURRENT.try_with(Clone::clone).unwrap_or_default();
      scope.0.push(tx);
      scope
   }

   /// Run `f` with this scope installed.
   pub(crate) async fn run<F: Future>(self, f: F) -> F::Output {
      CURRENT.scope(self, f).await
   }
}

/// The transaction the current task has open on `manager_id`'s database, if any.
pub(crate) fn current(manager_id: Uuid) -> Option<Arc<ActiveTransaction>> {
   CURRENT
      .try_with(|scope| scope.find(manager_id))
      .ok()
      .flatten()
}

#[cfg(test)]
mod tests {
   use super::*;
   use juego_sql_pool::ConnectionPool;

   #[tokio::test]
   async fn test_no_scope_outside_transaction() {
      assert!(current(Uuid::new_v4()).is_none());
   }

   #[tokio::test]
   async fn test_scope_lookup_by_manager() {
      let pool = ConnectionPool::open(":memory:", None).await.unwrap();
      let writer = TransactionWriter::begin(pool.acquire_writer().await.unwrap())
         .await
         .unwrap();

      let manager_id = Uuid::new_v4();
      let tx = Arc::new(ActiveTransaction::new(manager_id, writer));
      let tx_id = tx.transaction_id();

      TransactionScope::current_with(Arc::clone(&tx))
         .run(async move {
            assert_eq!(current(manager_id).map(|t| t.transaction_id()), Some(tx_id));
            assert!(current(Uuid::new_v4()).is_none());

            // Spawned tasks start without a scope
            let inherited = tokio::spawn(async move { current(manager_id).is_some() })
               .await
               .unwrap();
            assert!(!inherited);
         })
         .await;

      assert!(current(manager_id).is_none());
      tx.take().await.unwrap().rollback().await.unwrap();
   }

   #[tokio::test]
   async fn test_take_twice_is_already_finalized() {
      let pool = ConnectionPool::open(":memory:", None).await.unwrap();
      let writer = TransactionWriter::begin(pool.acquire_writer().await.unwrap())
         .await
         .unwrap();
      let tx = ActiveTransaction::new(Uuid::new_v4(), writer);

      tx.take().await.unwrap().commit().await.unwrap();

      assert!(matches!(
         tx.take().await.unwrap_err(),
         Error::TransactionAlreadyFinalized
      ));
      assert!(matches!(
         tx.lock().await.err(),
         Some(Error::TransactionAlreadyFinalized)
      ));
   }
}

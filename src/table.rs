use std::marker::PhantomData;

use crate::entity::Entity;
use crate::manager::SqlManager;
use crate::operation::{Changes, Filter, Values};
use crate::Result;

/// CRUD operations bound to one entity type.
///
/// Obtained from [`SqlManager::table`]; every call forwards to the manager, so it joins the
/// task's open transaction like any other operation.
///
/// ```no_run
/// # use juego_sql::{Column, Entity, Filter, SqlManager};
/// # #[derive(serde::Serialize, serde::Deserialize)] struct User { id: i64, name: String }
/// # impl Entity for User {
/// #    const TABLE: &'static str = "users";
/// #    const COLUMNS: &'static [Column] = &[Column::new("id").generated(), Column::new("name")];
/// # }
/// # async fn example(db: &SqlManager) -> juego_sql::Result<()> {
/// let users = db.table::<User>();
/// let alice = users.find_one(Filter::new().eq("name", "alice")).await?;
/// # Ok(())
/// # }
/// ```
pub struct Table<T> {
   db: SqlManager,
   _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
   fn clone(&self) -> Self {
      Self {
         db: self.db.clone(),
         _entity: PhantomData,
      }
   }
}

impl<T: Entity> Table<T> {
   pub(crate) fn new(db: SqlManager) -> Self {
      Self {
         db,
         _entity: PhantomData,
      }
   }

   pub fn manager(&self) -> &SqlManager {
      &self.db
   }

   pub async fn find_one(&self, filter: Filter) -> Result<Option<T>> {
      self.db.find_one::<T>(filter).await
   }

   pub async fn find_all(&self, filter: Filter) -> Result<Vec<T>> {
      self.db.find_all::<T>(filter).await
   }

   pub async fn insert(&self, values: Values) -> Result<i64> {
      self.db.insert::<T>(values).await
   }

   pub async fn insert_entity(&self, entity: &T) -> Result<i64> {
      self.db.insert_entity(entity).await
   }

   pub async fn insert_all(&self, entities: &[T]) -> Result<Vec<i64>> {
      self.db.insert_all(entities).await
   }

   pub async fn insert_batch(&self, entities: &[T]) -> Result<u64> {
      self.db.insert_batch(entities).await
   }

   pub async fn update(&self, filter: Filter, changes: Changes) -> Result<u64> {
      self.db.update::<T>(filter, changes).await
   }
}

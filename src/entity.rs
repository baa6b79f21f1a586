//! Entity declarations and the column maps built from them.
//!
//! An [`Entity`] names its table and lists its columns statically. Registering the type with
//! [`SqlManager::register`](crate::SqlManager::register) builds an [`EntityMap`] once; every
//! CRUD call then resolves clause keys and marshals rows through that map.
//!
//! ```
//! use juego_sql::{Column, Entity};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct UserSession {
//!    id: i64,
//!    user_id: i64,
//!    #[serde(default)]
//!    device: Option<serde_json::Value>,
//! }
//!
//! impl Entity for UserSession {
//!    const TABLE: &'static str = "user_sessions";
//!    const COLUMNS: &'static [Column] = &[
//!       Column::new("id").generated(),
//!       Column::new("user_id"),
//!       Column::new("device").named("device_info").json(),
//!    ];
//! }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::decode::JsonRow;
use crate::operation::{Changes, Filter, Mutation, Predicate, Values, object_entries};
use crate::{Error, Result};

/// A typed record stored as one row of [`Entity::TABLE`].
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
   /// Table the entity is stored in.
   const TABLE: &'static str;

   /// Declared columns, in insert order.
   const COLUMNS: &'static [Column];
}

/// Column declaration for one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
   /// Serialized field name.
   pub field: &'static str,
   /// Explicit column name; `None` means the column is named like the field.
   pub name: Option<&'static str>,
   /// Stored as JSON text.
   pub json: bool,
   /// Generated by the database (e.g. `INTEGER PRIMARY KEY`); skipped by entity inserts.
   pub generated: bool,
}

impl Column {
   pub const fn new(field: &'static str) -> Self {
      Self {
         field,
         name: None,
         json: false,
         generated: false,
      }
   }

   pub const fn named(mut self, column: &'static str) -> Self {
      self.name = Some(column);
      self
   }

   pub const fn json(mut self) -> Self {
      self.json = true;
      self
   }

   pub const fn generated(mut self) -> Self {
      self.generated = true;
      self
   }

   pub fn column_name(&self) -> &'static str {
      self.name.unwrap_or(self.field)
   }
}

/// Resolved column metadata for one entity type.
#[derive(Debug)]
pub struct EntityMap {
   entity: &'static str,
   table: &'static str,
   columns: Vec<Column>,
}

impl EntityMap {
   /// Build and validate the map for `T`.
   pub fn of<T: Entity>() -> Result<Self> {
      let entity = std::any::type_name::<T>();
      if T::TABLE.trim().is_empty() {
         return Err(Error::MissingTableName(entity));
      }
      validate_identifier(T::TABLE)?;

      let mut seen = HashSet::new();
      for column in T::COLUMNS {
         validate_identifier(column.column_name())?;
         if !seen.insert(column.column_name().to_ascii_lowercase()) {
            return Err(Error::DuplicateColumn(column.column_name().to_string()));
         }
      }

      Ok(Self {
         entity,
         table: T::TABLE,
         columns: T::COLUMNS.to_vec(),
      })
   }

   pub fn table(&self) -> &'static str {
      self.table
   }

   pub fn entity(&self) -> &'static str {
      self.entity
   }

   pub fn columns(&self) -> &[Column] {
      &self.columns
   }

   /// Find the column a clause key refers to.
   ///
   /// Tries an explicit column name, then a case-insensitive column name, then a
   /// case-insensitive field name.
   pub fn resolve(&self, key: &str) -> Result<&Column> {
      self
         .columns
         .iter()
         .find(|c| c.name == Some(key))
         .or_else(|| {
            self
               .columns
               .iter()
               .find(|c| c.column_name().eq_ignore_ascii_case(key))
         })
         .or_else(|| {
            self
               .columns
               .iter()
               .find(|c| c.field.eq_ignore_ascii_case(key))
         })
         .ok_or_else(|| Error::UnknownColumn {
            entity: self.entity,
            key: key.to_string(),
         })
   }

   /// Resolve filter keys to column names, encoding JSON column values.
   pub fn resolve_filter(&self, filter: Filter) -> Result<Vec<(&'static str, Predicate)>> {
      let mut seen = HashSet::new();
      filter
         .into_iter()
         .map(|(key, predicate)| {
            let column = self.resolve_unique(&key, &mut seen)?;
            let predicate = predicate.try_map(|v| encode_value(column, v))?;
            Ok((column.column_name(), predicate))
         })
         .collect()
   }

   /// Resolve change keys to column names, encoding JSON column values.
   pub fn resolve_changes(&self, changes: Changes) -> Result<Vec<(&'static str, Mutation)>> {
      let mut seen = HashSet::new();
      changes
         .into_iter()
         .map(|(key, mutation)| {
            let column = self.resolve_unique(&key, &mut seen)?;
            let mutation = match mutation {
               Mutation::Set(v) => Mutation::Set(encode_value(column, v)?),
               other => other,
            };
            Ok((column.column_name(), mutation))
         })
         .collect()
   }

   /// Resolve insert keys to column names, encoding JSON column values.
   pub fn resolve_values(&self, values: Values) -> Result<Vec<(&'static str, JsonValue)>> {
      let mut seen = HashSet::new();
      values
         .into_iter()
         .map(|(key, value)| {
            let column = self.resolve_unique(&key, &mut seen)?;
            Ok((column.column_name(), encode_value(column, value)?))
         })
         .collect()
   }

   /// Column values of an entity for insert, in declaration order, without generated columns.
   pub fn insert_values<T: Serialize>(&self, entity: &T) -> Result<Vec<(&'static str, JsonValue)>> {
      let mut fields = object_entries(entity)?;
      self
         .columns
         .iter()
         .filter(|c| !c.generated)
         .map(|c| {
            let value = fields.shift_remove(c.field).unwrap_or(JsonValue::Null);
            Ok((c.column_name(), encode_value(c, value)?))
         })
         .collect()
   }

   /// Map a decoded row onto the entity's fields and deserialize it.
   ///
   /// JSON columns are parsed; a NULL JSON column is left out so the field's serde default
   /// applies. Columns the entity doesn't declare pass through under their own name.
   pub fn from_row<T: DeserializeOwned>(&self, row: JsonRow) -> Result<T> {
      let mut object = serde_json::Map::with_capacity(row.len());

      for (name, value) in row {
         let Some(column) = self
            .columns
            .iter()
            .find(|c| c.column_name().eq_ignore_ascii_case(&name))
         else {
            object.insert(name, value);
            continue;
         };

         if column.json {
            match value {
               JsonValue::Null => continue,
               JsonValue::String(text) => {
                  let parsed = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
                  object.insert(column.field.to_string(), parsed);
               }
               other => {
                  object.insert(column.field.to_string(), other);
               }
            }
         } else {
            object.insert(column.field.to_string(), value);
         }
      }

      Ok(serde_json::from_value(JsonValue::Object(object))?)
   }

   fn resolve_unique(&self, key: &str, seen: &mut HashSet<&'static str>) -> Result<&Column> {
      let column = self.resolve(key)?;
      if !seen.insert(column.column_name()) {
         return Err(Error::DuplicateColumn(column.column_name().to_string()));
      }
      Ok(column)
   }
}

/// JSON columns are written as JSON text; NULL stays NULL.
fn encode_value(column: &Column, value: JsonValue) -> Result<JsonValue> {
   if !column.json || value.is_null() {
      return Ok(value);
   }
   Ok(JsonValue::String(serde_json::to_string(&value)?))
}

/// Check that a name is a plain SQL identifier: ASCII letters, digits and underscores, not
/// starting with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
   !name.is_empty()
      && !name.starts_with(|c: char| c.is_ascii_digit())
      && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_identifier(name: &str) -> Result<()> {
   if is_valid_identifier(name) {
      Ok(())
   } else {
      Err(Error::InvalidIdentifier(name.to_string()))
   }
}

/// Entity maps keyed by type, shared by every clone of a manager.
#[derive(Debug, Default)]
pub(crate) struct EntityRegistry {
   maps: RwLock<HashMap<TypeId, Arc<EntityMap>>>,
}

impl EntityRegistry {
   /// Build the map for `T` unless it already exists; `Ok(false)` when it did.
   pub(crate) fn register<T: Entity>(&self) -> Result<bool> {
      let id = TypeId::of::<T>();
      if self.read().contains_key(&id) {
         return Ok(false);
      }

      let map = Arc::new(EntityMap::of::<T>()?);
      let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
      // Another registration may have won the race since the read check
      if maps.contains_key(&id) {
         return Ok(false);
      }
      maps.insert(id, map);
      Ok(true)
   }

   pub(crate) fn get<T: Entity>(&self) -> Result<Arc<EntityMap>> {
      self
         .find(TypeId::of::<T>())
         .ok_or(Error::EntityNotRegistered(std::any::type_name::<T>()))
   }

   pub(crate) fn find(&self, id: TypeId) -> Option<Arc<EntityMap>> {
      self.read().get(&id).cloned()
   }

   fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TypeId, Arc<EntityMap>>> {
      self.maps.read().unwrap_or_else(PoisonError::into_inner)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde::Deserialize;
   use serde_json::json;

   #[derive(Debug, Serialize, Deserialize, PartialEq)]
   struct Account {
      id: i64,
      #[serde(rename = "displayName")]
      display_name: String,
      #[serde(default)]
      settings: Option<JsonValue>,
   }

   impl Entity for Account {
      const TABLE: &'static str = "accounts";
      const COLUMNS: &'static [Column] = &[
         Column::new("id").generated(),
         Column::new("displayName").named("display_name"),
         Column::new("settings").json(),
      ];
   }

   #[derive(Debug, Serialize, Deserialize)]
   struct Nameless {}

   impl Entity for Nameless {
      const TABLE: &'static str = "";
      const COLUMNS: &'static [Column] = &[];
   }

   #[derive(Debug, Serialize, Deserialize)]
   struct BadColumn {}

   impl Entity for BadColumn {
      const TABLE: &'static str = "bad";
      const COLUMNS: &'static [Column] = &[Column::new("name; DROP TABLE bad")];
   }

   #[test]
   fn test_valid_identifiers() {
      assert!(is_valid_identifier("users"));
      assert!(is_valid_identifier("_private"));
      assert!(is_valid_identifier("table_2"));
      assert!(!is_valid_identifier(""));
      assert!(!is_valid_identifier("2fast"));
      assert!(!is_valid_identifier("has space"));
      assert!(!is_valid_identifier("semi;colon"));
   }

   #[test]
   fn test_resolve_order() {
      let map = EntityMap::of::<Account>().unwrap();

      assert_eq!(map.resolve("display_name").unwrap().field, "displayName");
      assert_eq!(map.resolve("DISPLAY_NAME").unwrap().field, "displayName");
      assert_eq!(map.resolve("displayname").unwrap().column_name(), "display_name");
      assert_eq!(map.resolve("ID").unwrap().column_name(), "id");

      let err = map.resolve("nickname").unwrap_err();
      assert!(matches!(err, Error::UnknownColumn { ref key, .. } if key == "nickname"));
   }

   #[test]
   fn test_missing_table_name() {
      let err = EntityMap::of::<Nameless>().unwrap_err();
      assert!(matches!(err, Error::MissingTableName(_)));
   }

   #[test]
   fn test_invalid_column_identifier() {
      let err = EntityMap::of::<BadColumn>().unwrap_err();
      assert!(matches!(err, Error::InvalidIdentifier(_)));
   }

   #[test]
   fn test_duplicate_keys_rejected() {
      let map = EntityMap::of::<Account>().unwrap();
      let filter = Filter::new().eq("displayName", "a").eq("display_name", "b");

      let err = map.resolve_filter(filter).unwrap_err();
      assert!(matches!(err, Error::DuplicateColumn(ref c) if c == "display_name"));
   }

   #[test]
   fn test_insert_values_skip_generated_and_encode_json() {
      let map = EntityMap::of::<Account>().unwrap();
      let account = Account {
         id: 0,
         display_name: "alice".into(),
         settings: Some(json!({"theme": "dark"})),
      };

      let values = map.insert_values(&account).unwrap();
      assert_eq!(
         values,
         vec![
            ("display_name", json!("alice")),
            ("settings", json!(r#"{"theme":"dark"}"#)),
         ]
      );
   }

   #[test]
   fn test_from_row_parses_json_and_omits_null() {
      let map = EntityMap::of::<Account>().unwrap();

      let row: JsonRow = [
         ("id".to_string(), json!(3)),
         ("display_name".to_string(), json!("bob")),
         ("settings".to_string(), json!(r#"{"beta":true}"#)),
      ]
      .into_iter()
      .collect();
      let account: Account = map.from_row(row).unwrap();
      assert_eq!(account.settings, Some(json!({"beta": true})));
      assert_eq!(account.display_name, "bob");

      let row: JsonRow = [
         ("id".to_string(), json!(4)),
         ("display_name".to_string(), json!("carol")),
         ("settings".to_string(), JsonValue::Null),
      ]
      .into_iter()
      .collect();
      let account: Account = map.from_row(row).unwrap();
      assert_eq!(account.settings, None);
   }

   #[test]
   fn test_registry_is_idempotent() {
      let registry = EntityRegistry::default();

      assert!(registry.get::<Account>().is_err());
      assert!(registry.register::<Account>().unwrap());
      assert!(!registry.register::<Account>().unwrap());
      assert_eq!(registry.get::<Account>().unwrap().table(), "accounts");
   }
}

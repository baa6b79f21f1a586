use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Row, TypeInfo, Value, ValueRef};
use time::PrimitiveDateTime;

use crate::Error;

/// A decoded row: column name → JSON value, in select-list order.
pub type JsonRow = IndexMap<String, JsonValue>;

/// Convert a SQLite value to a JSON value.
///
/// BLOB values are returned as base64-encoded strings since JSON has no native binary type.
/// Booleans are stored as INTEGER in SQLite and come back as numbers unless the column is
/// declared `BOOLEAN`.
pub fn to_json(value: SqliteValueRef) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let column_type = value.type_info();

   let result = match column_type.name() {
      // Dates and times are stored as ISO 8601 TEXT
      "TEXT" | "DATE" | "TIME" => value
         .to_owned()
         .try_decode::<String>()
         .map(JsonValue::String)
         .unwrap_or(JsonValue::Null),

      "REAL" => value
         .to_owned()
         .try_decode::<f64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "INTEGER" | "NUMERIC" => value
         .to_owned()
         .try_decode::<i64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "BOOLEAN" => value
         .to_owned()
         .try_decode::<bool>()
         .map(JsonValue::Bool)
         .unwrap_or(JsonValue::Null),

      "DATETIME" => {
         if let Ok(dt) = value.to_owned().try_decode::<PrimitiveDateTime>() {
            JsonValue::String(dt.to_string())
         } else if let Ok(v) = value.to_owned().try_decode::<String>() {
            JsonValue::String(v)
         } else {
            JsonValue::Null
         }
      }

      "BLOB" => value
         .to_owned()
         .try_decode::<Vec<u8>>()
         .map(|blob| JsonValue::String(base64_encode(&blob)))
         .unwrap_or(JsonValue::Null),

      "NULL" => JsonValue::Null,

      other => match value.to_owned().try_decode::<String>() {
         Ok(text) => JsonValue::String(text),
         Err(_) => {
            return Err(Error::UnsupportedDatatype(format!(
               "Unknown SQLite type: {other}"
            )));
         }
      },
   };

   Ok(result)
}

/// Decode every column of a row.
pub fn decode_row(row: &SqliteRow) -> Result<JsonRow, Error> {
   let mut decoded = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      decoded.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(decoded)
}

/// Deserialize a decoded row that has no entity mapping.
///
/// The row is first read as an object keyed by column name. If that fails and the row has
/// exactly one column, its value is deserialized directly, so `SELECT COUNT(*) ...` can be
/// read into an `i64`.
pub(crate) fn deserialize_plain<T: DeserializeOwned>(row: JsonRow) -> Result<T, Error> {
   let single = (row.len() == 1).then(|| row.values().next().cloned()).flatten();

   match serde_json::from_value(JsonValue::Object(row.into_iter().collect())) {
      Ok(value) => Ok(value),
      Err(object_err) => match single {
         Some(scalar) => serde_json::from_value(scalar).map_err(|_| Error::Json(object_err)),
         None => Err(Error::Json(object_err)),
      },
   }
}

/// Base64 encode binary data for JSON serialization.
fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}

/// `std::any::type_name` with module paths stripped, e.g. `Vec<User>`.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
   let full = std::any::type_name::<T>();
   let mut out = String::with_capacity(full.len());
   let mut segment = String::new();

   for c in full.chars() {
      if c.is_alphanumeric() || c == '_' || c == ':' {
         segment.push(c);
      } else {
         out.push_str(segment.rsplit("::").next().unwrap_or_default());
         segment.clear();
         out.push(c);
      }
   }
   out.push_str(segment.rsplit("::").next().unwrap_or_default());
   out
}

//! Operation descriptors and the clause mappings that carry them.
//!
//! A [`Filter`] maps column names to [`Predicate`]s and compiles to a WHERE clause.
//! A [`Changes`] maps column names to [`Mutation`]s and compiles to a SET clause.
//! A [`Values`] is the plain column → value map used by inserts.
//!
//! ```
//! use juego_sql::{Changes, Filter, Mutation, Predicate};
//!
//! let filter = Filter::new()
//!    .eq("status", 1)
//!    .with("name", Predicate::In(vec!["alice", "carol"]))
//!    .with("score", Predicate::GreaterThanEqual(10));
//!
//! let changes = Changes::new()
//!    .set("status", 2)
//!    .with("counter", Mutation::Increment(5));
//! ```

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// Comparison applied to a column in a WHERE clause.
///
/// Every variant except `In` carries one value; `In` carries the candidate list, which is
/// bound as a collection and expanded into `IN (?, ?, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate<V = JsonValue> {
   Equal(V),
   Not(V),
   In(Vec<V>),
   LessThan(V),
   LessThanEqual(V),
   GreaterThan(V),
   GreaterThanEqual(V),
}

impl<V> Predicate<V> {
   /// Convert the payload, keeping the operator.
   pub fn map<U>(self, mut f: impl FnMut(V) -> U) -> Predicate<U> {
      match self {
         Predicate::Equal(v) => Predicate::Equal(f(v)),
         Predicate::Not(v) => Predicate::Not(f(v)),
         Predicate::In(vs) => Predicate::In(vs.into_iter().map(f).collect()),
         Predicate::LessThan(v) => Predicate::LessThan(f(v)),
         Predicate::LessThanEqual(v) => Predicate::LessThanEqual(f(v)),
         Predicate::GreaterThan(v) => Predicate::GreaterThan(f(v)),
         Predicate::GreaterThanEqual(v) => Predicate::GreaterThanEqual(f(v)),
      }
   }

   /// Fallible form of [`map`](Self::map).
   pub fn try_map<U, E>(self, mut f: impl FnMut(V) -> std::result::Result<U, E>) -> std::result::Result<Predicate<U>, E> {
      Ok(match self {
         Predicate::Equal(v) => Predicate::Equal(f(v)?),
         Predicate::Not(v) => Predicate::Not(f(v)?),
         Predicate::In(vs) => Predicate::In(vs.into_iter().map(f).collect::<std::result::Result<_, _>>()?),
         Predicate::LessThan(v) => Predicate::LessThan(f(v)?),
         Predicate::LessThanEqual(v) => Predicate::LessThanEqual(f(v)?),
         Predicate::GreaterThan(v) => Predicate::GreaterThan(f(v)?),
         Predicate::GreaterThanEqual(v) => Predicate::GreaterThanEqual(f(v)?),
      })
   }

   /// SQL comparison operator rendered for this predicate.
   pub fn sql_operator(&self) -> &'static str {
      match self {
         Predicate::Equal(_) => "=",
         Predicate::Not(_) => "!=",
         Predicate::In(_) => "IN",
         Predicate::LessThan(_) => "<",
         Predicate::LessThanEqual(_) => "<=",
         Predicate::GreaterThan(_) => ">",
         Predicate::GreaterThanEqual(_) => ">=",
      }
   }
}

impl<V> From<V> for Predicate<V> {
   fn from(value: V) -> Self {
      Predicate::Equal(value)
   }
}

/// Assignment applied to a column in a SET clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<V = JsonValue> {
   Set(V),
   /// `col = col + value`; the value must be numeric.
   Increment(V),
   /// `col = col - value`; the value must be numeric.
   Decrement(V),
}

impl<V> Mutation<V> {
   /// Convert the payload, keeping the mutator.
   pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Mutation<U> {
      match self {
         Mutation::Set(v) => Mutation::Set(f(v)),
         Mutation::Increment(v) => Mutation::Increment(f(v)),
         Mutation::Decrement(v) => Mutation::Decrement(f(v)),
      }
   }

   pub fn value(&self) -> &V {
      match self {
         Mutation::Set(v) | Mutation::Increment(v) | Mutation::Decrement(v) => v,
      }
   }
}

impl<V> From<V> for Mutation<V> {
   fn from(value: V) -> Self {
      Mutation::Set(value)
   }
}

/// Ordered column → predicate mapping compiled into a WHERE clause.
///
/// An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(IndexMap<String, Predicate>);

impl Filter {
   pub fn new() -> Self {
      Self::default()
   }

   /// Filter that matches every row.
   pub fn all() -> Self {
      Self::default()
   }

   /// Add an equality condition.
   pub fn eq(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.with(column, Predicate::Equal(value.into()))
   }

   /// Add a condition with an explicit operator.
   ///
   /// Adding the same column twice replaces the earlier condition but keeps its position.
   pub fn with<V: Into<JsonValue>>(mut self, column: impl Into<String>, predicate: Predicate<V>) -> Self {
      self.0.insert(column.into(), predicate.map(Into::into));
      self
   }

   /// Equality filter from the named fields of any serializable value.
   ///
   /// ```
   /// # use juego_sql::Filter;
   /// #[derive(serde::Serialize)]
   /// struct ByUser<'a> { user_id: i64, access_token: &'a str }
   ///
   /// let filter = Filter::from_serialize(&ByUser { user_id: 7, access_token: "t" }).unwrap();
   /// assert_eq!(filter.len(), 2);
   /// ```
   pub fn from_serialize<S: Serialize + ?Sized>(value: &S) -> Result<Self> {
      Ok(Self(
         object_entries(value)?
            .into_iter()
            .map(|(k, v)| (k, Predicate::Equal(v)))
            .collect(),
      ))
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn iter(&self) -> impl Iterator<Item = (&str, &Predicate)> {
      self.0.iter().map(|(k, v)| (k.as_str(), v))
   }
}

impl IntoIterator for Filter {
   type Item = (String, Predicate);
   type IntoIter = indexmap::map::IntoIter<String, Predicate>;

   fn into_iter(self) -> Self::IntoIter {
      self.0.into_iter()
   }
}

impl<K: Into<String>> FromIterator<(K, Predicate)> for Filter {
   fn from_iter<I: IntoIterator<Item = (K, Predicate)>>(iter: I) -> Self {
      Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
   }
}

/// Ordered column → mutation mapping compiled into a SET clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes(IndexMap<String, Mutation>);

impl Changes {
   pub fn new() -> Self {
      Self::default()
   }

   /// Assign a value.
   pub fn set(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.with(column, Mutation::Set(value.into()))
   }

   /// Apply an explicit mutation.
   pub fn with<V: Into<JsonValue>>(mut self, column: impl Into<String>, mutation: Mutation<V>) -> Self {
      self.0.insert(column.into(), mutation.map(Into::into));
      self
   }

   /// Plain assignments from the named fields of any serializable value.
   pub fn from_serialize<S: Serialize + ?Sized>(value: &S) -> Result<Self> {
      Ok(Self(
         object_entries(value)?
            .into_iter()
            .map(|(k, v)| (k, Mutation::Set(v)))
            .collect(),
      ))
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn iter(&self) -> impl Iterator<Item = (&str, &Mutation)> {
      self.0.iter().map(|(k, v)| (k.as_str(), v))
   }
}

impl IntoIterator for Changes {
   type Item = (String, Mutation);
   type IntoIter = indexmap::map::IntoIter<String, Mutation>;

   fn into_iter(self) -> Self::IntoIter {
      self.0.into_iter()
   }
}

impl<K: Into<String>> FromIterator<(K, Mutation)> for Changes {
   fn from_iter<I: IntoIterator<Item = (K, Mutation)>>(iter: I) -> Self {
      Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
   }
}

/// Ordered column → value mapping for inserts.
///
/// The key set is used verbatim as the insert's column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(IndexMap<String, JsonValue>);

impl Values {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn set(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.0.insert(column.into(), value.into());
      self
   }

   /// Values from the named fields of any serializable value.
   pub fn from_serialize<S: Serialize + ?Sized>(value: &S) -> Result<Self> {
      Ok(Self(object_entries(value)?))
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn get(&self, column: &str) -> Option<&JsonValue> {
      self.0.get(column)
   }

   pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
      self.0.iter().map(|(k, v)| (k.as_str(), v))
   }
}

impl IntoIterator for Values {
   type Item = (String, JsonValue);
   type IntoIter = indexmap::map::IntoIter<String, JsonValue>;

   fn into_iter(self) -> Self::IntoIter {
      self.0.into_iter()
   }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for Values {
   fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
      Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
   }
}

/// Serialize `value` and return its fields in declaration order.
pub(crate) fn object_entries<S: Serialize + ?Sized>(value: &S) -> Result<IndexMap<String, JsonValue>> {
   match serde_json::to_value(value)? {
      JsonValue::Object(map) => Ok(map.into_iter().collect()),
      other => Err(Error::NotAnObject(json_kind(&other).to_string())),
   }
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
   match value {
      JsonValue::Null => "null",
      JsonValue::Bool(_) => "boolean",
      JsonValue::Number(_) => "number",
      JsonValue::String(_) => "string",
      JsonValue::Array(_) => "array",
      JsonValue::Object(_) => "object",
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_predicate_map_keeps_operator() {
      let p = Predicate::In(vec![1, 2, 3]).map(|v| v * 10);
      assert_eq!(p, Predicate::In(vec![10, 20, 30]));

      let p = Predicate::Not("x").map(JsonValue::from);
      assert_eq!(p, Predicate::Not(json!("x")));
   }

   #[test]
   fn test_sql_operators() {
      assert_eq!(Predicate::Equal(1).sql_operator(), "=");
      assert_eq!(Predicate::Not(1).sql_operator(), "!=");
      assert_eq!(Predicate::In(vec![1]).sql_operator(), "IN");
      assert_eq!(Predicate::LessThan(1).sql_operator(), "<");
      assert_eq!(Predicate::LessThanEqual(1).sql_operator(), "<=");
      assert_eq!(Predicate::GreaterThan(1).sql_operator(), ">");
      assert_eq!(Predicate::GreaterThanEqual(1).sql_operator(), ">=");
   }

   #[test]
   fn test_filter_preserves_insertion_order() {
      let filter = Filter::new()
         .eq("b", 1)
         .with("a", Predicate::Not("x"))
         .eq("c", true);

      let keys: Vec<_> = filter.iter().map(|(k, _)| k).collect();
      assert_eq!(keys, ["b", "a", "c"]);
   }

   #[test]
   fn test_filter_replaces_duplicate_key() {
      let filter = Filter::new().eq("id", 1).eq("id", 2);
      assert_eq!(filter.len(), 1);
      assert_eq!(filter.iter().next(), Some(("id", &Predicate::Equal(json!(2)))));
   }

   #[test]
   fn test_from_serialize_struct() {
      #[derive(Serialize)]
      struct Where {
         user_id: i64,
         access_token: &'static str,
      }

      let filter = Filter::from_serialize(&Where {
         user_id: 7,
         access_token: "abc",
      })
      .unwrap();

      let entries: Vec<_> = filter.into_iter().collect();
      assert_eq!(
         entries,
         vec![
            ("user_id".to_string(), Predicate::Equal(json!(7))),
            ("access_token".to_string(), Predicate::Equal(json!("abc"))),
         ]
      );
   }

   #[test]
   fn test_from_serialize_rejects_scalars() {
      let err = Values::from_serialize(&42).unwrap_err();
      assert!(matches!(err, Error::NotAnObject(ref kind) if kind == "number"));
   }

   #[test]
   fn test_changes_mutations() {
      let changes = Changes::new()
         .set("name", "updated")
         .with("counter", Mutation::Decrement(3));

      let entries: Vec<_> = changes.iter().collect();
      assert_eq!(entries[0], ("name", &Mutation::Set(json!("updated"))));
      assert_eq!(entries[1], ("counter", &Mutation::Decrement(json!(3))));
      assert_eq!(entries[1].1.value(), &json!(3));
   }
}

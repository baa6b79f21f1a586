//! Named `@parameter` binding over SQLite's positional placeholders.
//!
//! Statements are written with `@name` placeholders. Before execution they are rewritten to
//! `?` markers and the bound values are laid out in placeholder order. A list parameter
//! expands in place to a parenthesised placeholder list, so `id IN @ids` with three ids
//! becomes `id IN (?, ?, ?)`.
//!
//! `@` inside string literals, quoted identifiers and comments is left alone.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::operation::object_entries;
use crate::{Error, Result};

/// Value bound to one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
   Scalar(JsonValue),
   /// Expanded into `(?, ?, ...)`; an empty list renders `()`.
   List(Vec<JsonValue>),
}

/// Named parameter set for a statement.
///
/// ```
/// use juego_sql::Params;
///
/// let params = Params::new()
///    .bind("status", 1)
///    .bind_list("ids", [3, 5, 8]);
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(IndexMap<String, ParamValue>);

impl Params {
   pub fn new() -> Self {
      Self::default()
   }

   /// Bind a scalar value to `@name`.
   pub fn bind(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.insert(name, ParamValue::Scalar(value.into()));
      self
   }

   /// Bind a collection to `@name` for use with `IN @name`.
   pub fn bind_list<I>(mut self, name: impl Into<String>, values: I) -> Self
   where
      I: IntoIterator,
      I::Item: Into<JsonValue>,
   {
      self.insert(
         name,
         ParamValue::List(values.into_iter().map(Into::into).collect()),
      );
      self
   }

   /// Parameters from the named fields of a serializable value.
   ///
   /// Array fields are bound as lists, everything else as scalars.
   pub fn from_serialize<S: Serialize + ?Sized>(value: &S) -> Result<Self> {
      Ok(Self(
         object_entries(value)?
            .into_iter()
            .map(|(name, value)| {
               let value = match value {
                  JsonValue::Array(items) => ParamValue::List(items),
                  other => ParamValue::Scalar(other),
               };
               (name, value)
            })
            .collect(),
      ))
   }

   pub(crate) fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
      let name = name.into();
      let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
      self.0.insert(name, value);
   }

   /// Add every parameter of `other`, replacing any with the same name.
   pub fn extend(&mut self, other: Params) {
      self.0.extend(other.0);
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn get(&self, name: &str) -> Option<&ParamValue> {
      self.0.get(name).or_else(|| {
         self
            .0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
      })
   }
}

/// Rewrite `@name` placeholders to `?` and collect the values in placeholder order.
///
/// A placeholder with no bound parameter fails with [`Error::MissingParameter`]. Bound
/// parameters the statement never references are ignored.
pub fn expand(sql: &str, params: &Params) -> Result<(String, Vec<JsonValue>)> {
   let bytes = sql.as_bytes();
   let mut out = String::with_capacity(sql.len());
   let mut values = Vec::new();
   let mut copied = 0;
   let mut i = 0;

   while i < bytes.len() {
      match bytes[i] {
         quote @ (b'\'' | b'"' | b'`') => {
            i = skip_quoted(bytes, i + 1, quote);
         }
         b'[' => {
            i = skip_until(bytes, i + 1, b"]");
         }
         b'-' if bytes.get(i + 1) == Some(&b'-') => {
            i = skip_until(bytes, i + 2, b"\n");
         }
         b'/' if bytes.get(i + 1) == Some(&b'*') => {
            i = skip_until(bytes, i + 2, b"*/");
         }
         b'@' if is_placeholder_start(bytes, i) => {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident_byte(bytes[end]) {
               end += 1;
            }
            let name = &sql[start..end];

            out.push_str(&sql[copied..i]);
            match params.get(name) {
               Some(ParamValue::Scalar(value)) => {
                  out.push('?');
                  values.push(value.clone());
               }
               Some(ParamValue::List(items)) => {
                  out.push('(');
                  for (n, item) in items.iter().enumerate() {
                     if n > 0 {
                        out.push_str(", ");
                     }
                     out.push('?');
                     values.push(item.clone());
                  }
                  out.push(')');
               }
               None => return Err(Error::MissingParameter(name.to_string())),
            }

            copied = end;
            i = end;
         }
         _ => i += 1,
      }
   }

   out.push_str(&sql[copied..]);
   Ok((out, values))
}

fn is_ident_byte(b: u8) -> bool {
   b.is_ascii_alphanumeric() || b == b'_'
}

fn is_placeholder_start(bytes: &[u8], at: usize) -> bool {
   let preceded_by_ident = at > 0 && (is_ident_byte(bytes[at - 1]) || bytes[at - 1] == b'@');
   let followed_by_name = bytes
      .get(at + 1)
      .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
   !preceded_by_ident && followed_by_name
}

/// Skip a quoted run; a doubled quote is an escaped quote.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
   while i < bytes.len() {
      if bytes[i] == quote {
         if bytes.get(i + 1) == Some(&quote) {
            i += 2;
            continue;
         }
         return i + 1;
      }
      i += 1;
   }
   i
}

fn skip_until(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
   bytes[from.min(bytes.len())..]
      .windows(terminator.len())
      .position(|w| w == terminator)
      .map(|p| from + p + terminator.len())
      .unwrap_or(bytes.len())
}

type SqliteQuery<'a> = sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>;

/// Bind a JSON value to a SQLx query.
pub(crate) fn bind_value(query: SqliteQuery<'_>, value: JsonValue) -> SqliteQuery<'_> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for SQLite's INTEGER, falls back to REAL
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as JSON text
      other => query.bind(other),
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_expand_scalars_in_placeholder_order() {
      let params = Params::new().bind("b", 2).bind("a", "x");
      let (sql, values) = expand("SELECT * FROM t WHERE a = @a AND b = @b", &params).unwrap();

      assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
      assert_eq!(values, vec![json!("x"), json!(2)]);
   }

   #[test]
   fn test_expand_list() {
      let params = Params::new().bind_list("ids", [1, 2, 3]);
      let (sql, values) = expand("SELECT * FROM t WHERE id IN @ids", &params).unwrap();

      assert_eq!(sql, "SELECT * FROM t WHERE id IN (?, ?, ?)");
      assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
   }

   #[test]
   fn test_expand_empty_list() {
      let params = Params::new().bind_list("ids", Vec::<i64>::new());
      let (sql, values) = expand("SELECT * FROM t WHERE id IN @ids", &params).unwrap();

      assert_eq!(sql, "SELECT * FROM t WHERE id IN ()");
      assert!(values.is_empty());
   }

   #[test]
   fn test_expand_repeated_placeholder_binds_twice() {
      let params = Params::new().bind("n", 5);
      let (sql, values) = expand("SELECT @n + @n", &params).unwrap();

      assert_eq!(sql, "SELECT ? + ?");
      assert_eq!(values, vec![json!(5), json!(5)]);
   }

   #[test]
   fn test_expand_ignores_literals_and_comments() {
      let params = Params::new().bind("id", 1);
      let sql = "SELECT '@id', \"@col\", [@x], `@y` -- @nope\nFROM t /* @also_not */ WHERE id = @id";
      let (expanded, values) = expand(sql, &params).unwrap();

      assert_eq!(
         expanded,
         "SELECT '@id', \"@col\", [@x], `@y` -- @nope\nFROM t /* @also_not */ WHERE id = ?"
      );
      assert_eq!(values, vec![json!(1)]);
   }

   #[test]
   fn test_expand_escaped_quote_in_literal() {
      let params = Params::new().bind("name", "bob");
      let (sql, _) = expand("SELECT 'it''s @name' WHERE name = @name", &params).unwrap();
      assert_eq!(sql, "SELECT 'it''s @name' WHERE name = ?");
   }

   #[test]
   fn test_expand_skips_email_like_text() {
      let (sql, values) = expand("SELECT user@example", &Params::new()).unwrap();
      assert_eq!(sql, "SELECT user@example");
      assert!(values.is_empty());
   }

   #[test]
   fn test_expand_missing_parameter() {
      let err = expand("SELECT * FROM t WHERE id = @id", &Params::new()).unwrap_err();
      assert!(matches!(err, Error::MissingParameter(ref name) if name == "id"));
   }

   #[test]
   fn test_expand_matches_names_case_insensitively() {
      let params = Params::new().bind("UserId", 9);
      let (_, values) = expand("SELECT * FROM t WHERE user_id = @userid", &params).unwrap();
      assert_eq!(values, vec![json!(9)]);
   }

   #[test]
   fn test_bind_strips_leading_at() {
      let params = Params::new().bind("@id", 4);
      assert_eq!(params.get("id"), Some(&ParamValue::Scalar(json!(4))));
   }

   #[test]
   fn test_from_serialize_arrays_become_lists() {
      #[derive(Serialize)]
      struct Args {
         status: i32,
         ids: Vec<i64>,
      }

      let params = Params::from_serialize(&Args {
         status: 1,
         ids: vec![2, 3],
      })
      .unwrap();

      assert_eq!(params.get("status"), Some(&ParamValue::Scalar(json!(1))));
      assert_eq!(
         params.get("ids"),
         Some(&ParamValue::List(vec![json!(2), json!(3)]))
      );
   }
}

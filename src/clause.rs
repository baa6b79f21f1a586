//! WHERE / SET clause compilation.
//!
//! Every value becomes a named parameter; only column names are written into the SQL text.
//! Callers pass column names that were already resolved against an entity map, so they are
//! known to be plain identifiers.

use serde_json::Value as JsonValue;

use crate::operation::{Mutation, Predicate, json_kind};
use crate::params::{ParamValue, Params};
use crate::{Error, Result};

/// Parameter name prefix for the WHERE half of an update.
pub const WHERE_PREFIX: &str = "Where_";
/// Parameter name prefix for the SET half of an update.
pub const UPDATE_PREFIX: &str = "Update_";

/// SQL fragment with the parameters its placeholders refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledClause {
   pub sql: String,
   pub params: Params,
}

/// Compile `column OP @param` conditions joined with `AND`.
///
/// An empty set of conditions compiles to `1 = 1`.
pub fn compile_where<'a, I>(conditions: I, prefix: &str) -> CompiledClause
where
   I: IntoIterator<Item = (&'a str, &'a Predicate)>,
{
   let mut parts = Vec::new();
   let mut params = Params::new();

   for (column, predicate) in conditions {
      let name = format!("{prefix}{column}");
      parts.push(format!("{column} {} @{name}", predicate.sql_operator()));

      let value = match predicate {
         Predicate::In(items) => ParamValue::List(items.clone()),
         Predicate::Equal(v)
         | Predicate::Not(v)
         | Predicate::LessThan(v)
         | Predicate::LessThanEqual(v)
         | Predicate::GreaterThan(v)
         | Predicate::GreaterThanEqual(v) => ParamValue::Scalar(v.clone()),
      };
      params.insert(name, value);
   }

   let sql = if parts.is_empty() {
      "1 = 1".to_string()
   } else {
      parts.join(" AND ")
   };

   CompiledClause { sql, params }
}

/// Compile `column = @param` assignments joined with `, `.
///
/// `Increment` and `Decrement` render `column = column + @param` / `column - @param` and
/// require a numeric payload.
pub fn compile_set<'a, I>(assignments: I, prefix: &str) -> Result<CompiledClause>
where
   I: IntoIterator<Item = (&'a str, &'a Mutation)>,
{
   let mut parts = Vec::new();
   let mut params = Params::new();

   for (column, mutation) in assignments {
      let name = format!("{prefix}{column}");
      let part = match mutation {
         Mutation::Set(_) => format!("{column} = @{name}"),
         Mutation::Increment(v) => {
            ensure_numeric(column, v)?;
            format!("{column} = {column} + @{name}")
         }
         Mutation::Decrement(v) => {
            ensure_numeric(column, v)?;
            format!("{column} = {column} - @{name}")
         }
      };
      parts.push(part);
      params.insert(name, ParamValue::Scalar(mutation.value().clone()));
   }

   if parts.is_empty() {
      return Err(Error::EmptyChanges);
   }

   Ok(CompiledClause {
      sql: parts.join(", "),
      params,
   })
}

fn ensure_numeric(column: &str, value: &JsonValue) -> Result<()> {
   if value.is_number() {
      return Ok(());
   }
   Err(Error::InvalidOperand {
      column: column.to_string(),
      reason: format!("increment/decrement needs a number, got {}", json_kind(value)),
   })
}

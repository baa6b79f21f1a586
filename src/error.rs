/// Result type alias for data-access operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure class of an [`Error`].
///
/// Configuration and compilation errors are raised before any statement reaches the
/// database; database errors come back from SQLite or the pool; transaction errors are
/// raised by [`SqlManager::transaction`](crate::SqlManager::transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
   Configuration,
   Compilation,
   Database,
   Transaction,
}

/// Error types for the data-access layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection pool.
   #[error(transparent)]
   Pool(#[from] juego_sql_pool::Error),

   /// JSON (de)serialization failed while mapping values.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// No connection string was supplied.
   #[error("connection string is not set")]
   MissingConnectionString,

   /// The connection string could not be turned into a database path.
   #[error("invalid connection string: {0}")]
   InvalidConnectionString(String),

   /// An entity declared an empty table name.
   #[error("table name not found for entity {0}")]
   MissingTableName(&'static str),

   /// A table or column name is not a plain SQL identifier.
   #[error(
      "invalid identifier '{0}': must contain only alphanumeric characters and underscores, and cannot start with a digit"
   )]
   InvalidIdentifier(String),

   /// An entity was used before `SqlManager::register` was called for it.
   #[error("entity {0} is not registered")]
   EntityNotRegistered(&'static str),

   /// A clause key matches no declared column of the entity.
   #[error("{entity} has no column matching '{key}'")]
   UnknownColumn { entity: &'static str, key: String },

   /// Two keys in one clause mapping resolve to the same column.
   #[error("column '{0}' appears more than once in the same clause")]
   DuplicateColumn(String),

   /// An update was requested with nothing to set.
   #[error("update requires at least one column to set")]
   EmptyChanges,

   /// An operation payload has the wrong shape for its operator.
   #[error("invalid operand for column '{column}': {reason}")]
   InvalidOperand { column: String, reason: String },

   /// SQL text references a `@name` parameter that was never bound.
   #[error("missing value for parameter @{0}")]
   MissingParameter(String),

   /// A value expected to be a JSON object (field map) was something else.
   #[error("expected an object with named fields, got {0}")]
   NotAnObject(String),

   /// An insert completed without generating a row id.
   #[error("insert into {0} did not generate a key")]
   NoGeneratedKey(String),

   /// The operation did not finish within the configured deadline.
   #[error("{operation} timed out after {elapsed_ms} ms")]
   Timeout { operation: String, elapsed_ms: u128 },

   /// The transaction body failed and its changes were rolled back.
   #[error("transaction failed")]
   TransactionFailed {
      #[source]
      source: Box<Error>,
   },

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Transaction has already been committed or rolled back.
   #[error("transaction has already been finalized (committed or rolled back)")]
   TransactionAlreadyFinalized,

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Pool(_) => "CONNECTION_ERROR".to_string(),
         Error::Json(_) => "JSON_ERROR".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MissingConnectionString => "MISSING_CONNECTION_STRING".to_string(),
         Error::InvalidConnectionString(_) => "INVALID_CONNECTION_STRING".to_string(),
         Error::MissingTableName(_) => "MISSING_TABLE_NAME".to_string(),
         Error::InvalidIdentifier(_) => "INVALID_IDENTIFIER".to_string(),
         Error::EntityNotRegistered(_) => "ENTITY_NOT_REGISTERED".to_string(),
         Error::UnknownColumn { .. } => "UNKNOWN_COLUMN".to_string(),
         Error::DuplicateColumn(_) => "DUPLICATE_COLUMN".to_string(),
         Error::EmptyChanges => "EMPTY_CHANGES".to_string(),
         Error::InvalidOperand { .. } => "INVALID_OPERAND".to_string(),
         Error::MissingParameter(_) => "MISSING_PARAMETER".to_string(),
         Error::NotAnObject(_) => "NOT_AN_OBJECT".to_string(),
         Error::NoGeneratedKey(_) => "NO_GENERATED_KEY".to_string(),
         Error::Timeout { .. } => "TIMEOUT".to_string(),
         Error::TransactionFailed { .. } => "TRANSACTION_FAILED".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }

   /// Classify this error.
   pub fn category(&self) -> ErrorCategory {
      match self {
         Error::MissingConnectionString
         | Error::InvalidConnectionString(_)
         | Error::MissingTableName(_)
         | Error::InvalidIdentifier(_)
         | Error::EntityNotRegistered(_)
         | Error::Pool(juego_sql_pool::Error::PoolClosed | juego_sql_pool::Error::EmptyPath) => {
            ErrorCategory::Configuration
         }
         Error::UnknownColumn { .. }
         | Error::DuplicateColumn(_)
         | Error::EmptyChanges
         | Error::InvalidOperand { .. }
         | Error::MissingParameter(_)
         | Error::NotAnObject(_) => ErrorCategory::Compilation,
         Error::TransactionFailed { .. }
         | Error::TransactionRollbackFailed { .. }
         | Error::TransactionAlreadyFinalized => ErrorCategory::Transaction,
         Error::Sqlx(_)
         | Error::Pool(_)
         | Error::Json(_)
         | Error::UnsupportedDatatype(_)
         | Error::NoGeneratedKey(_)
         | Error::Timeout { .. }
         | Error::Other(_) => ErrorCategory::Database,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::error::Error as _;

   #[test]
   fn test_error_code_unknown_column() {
      let err = Error::UnknownColumn {
         entity: "User",
         key: "nickname".into(),
      };
      assert_eq!(err.error_code(), "UNKNOWN_COLUMN");
      assert_eq!(err.category(), ErrorCategory::Compilation);
      assert!(err.to_string().contains("nickname"));
   }

   #[test]
   fn test_error_code_missing_parameter() {
      let err = Error::MissingParameter("id".into());
      assert_eq!(err.error_code(), "MISSING_PARAMETER");
      assert_eq!(err.to_string(), "missing value for parameter @id");
   }

   #[test]
   fn test_transaction_failed_keeps_source() {
      let err = Error::TransactionFailed {
         source: Box::new(Error::Other("break transaction".into())),
      };
      assert_eq!(err.to_string(), "transaction failed");
      assert_eq!(err.error_code(), "TRANSACTION_FAILED");
      assert_eq!(err.category(), ErrorCategory::Transaction);
      assert_eq!(
         err.source().map(|s| s.to_string()),
         Some("break transaction".to_string())
      );
   }

   #[test]
   fn test_error_code_transaction_rollback_failed() {
      let err = Error::TransactionRollbackFailed {
         transaction_error: "constraint".into(),
         rollback_error: "busy".into(),
      };
      assert_eq!(err.error_code(), "TRANSACTION_ROLLBACK_FAILED");
      assert!(err.to_string().contains("constraint"));
      assert!(err.to_string().contains("busy"));
   }

   #[test]
   fn test_configuration_category() {
      assert_eq!(
         Error::MissingConnectionString.category(),
         ErrorCategory::Configuration
      );
      assert_eq!(
         Error::EntityNotRegistered("User").category(),
         ErrorCategory::Configuration
      );
      assert_eq!(
         Error::Pool(juego_sql_pool::Error::PoolClosed).category(),
         ErrorCategory::Configuration
      );
   }

   #[test]
   fn test_timeout_message() {
      let err = Error::Timeout {
         operation: "FindAll<User>".into(),
         elapsed_ms: 250,
      };
      assert_eq!(err.to_string(), "FindAll<User> timed out after 250 ms");
      assert_eq!(err.category(), ErrorCategory::Database);
   }

   #[test]
   fn test_error_code_sqlx_non_database() {
      // RowNotFound is not a database error, so no SQLite code
      let err = Error::Sqlx(sqlx::Error::RowNotFound);
      assert_eq!(err.error_code(), "SQLX_ERROR");
      assert_eq!(err.category(), ErrorCategory::Database);
   }
}

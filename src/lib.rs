//! Data access for SQLite: clause compilation, entity mapping and ambient transactions.
//!
//! This crate sits on top of the connection pools in `juego-sql-pool` and provides:
//!
//! - [`SqlManager`], the entry point: CRUD over registered entities, raw SQL with named
//!   `@parameters`, and [`SqlManager::transaction`]
//! - [`Filter`], [`Changes`] and [`Values`], ordered column mappings compiled into WHERE, SET
//!   and INSERT clauses, with [`Predicate`] and [`Mutation`] for non-equality operators
//! - [`Entity`], a static table and column declaration used to marshal rows
//! - [`Table`], a typed facade over the CRUD operations of one entity
//!
//! Operations issued inside a transaction body, at any call depth in the same task, run on
//! the transaction's connection without it being passed around.
//!
//! # Example
//!
//! ```no_run
//! use juego_sql::{Changes, Column, Entity, Filter, Mutation, Predicate, SqlManager, Values};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Product {
//!    id: i64,
//!    name: String,
//!    stock: i64,
//! }
//!
//! impl Entity for Product {
//!    const TABLE: &'static str = "products";
//!    const COLUMNS: &'static [Column] = &[
//!       Column::new("id").generated(),
//!       Column::new("name"),
//!       Column::new("stock"),
//!    ];
//! }
//!
//! # async fn example() -> juego_sql::Result<()> {
//! let db = SqlManager::from_env(None).await?;
//! db.register::<Product>()?;
//!
//! let id = db
//!    .insert::<Product>(Values::new().set("name", "lamp").set("stock", 3))
//!    .await?;
//!
//! // Read
//! let in_stock = db
//!    .find_all::<Product>(Filter::new().with("stock", Predicate::GreaterThan(0)))
//!    .await?;
//!
//! // Transaction
//! db.transaction(|| async {
//!    db.update::<Product>(
//!       Filter::new().eq("id", id),
//!       Changes::new().with("stock", Mutation::Decrement(1)),
//!    )
//!    .await?;
//!    db.execute("INSERT INTO audit (product_id) VALUES (@id)")
//!       .bind("id", id)
//!       .await?;
//!    Ok(())
//! })
//! .await?;
//!
//! let total: i64 = db
//!    .query_one("SELECT SUM(stock) FROM products WHERE id IN @ids")
//!    .bind_list("ids", [id])
//!    .await?
//!    .unwrap_or_default();
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod builders;
pub mod clause;
pub mod config;
pub mod decode;
pub mod entity;
pub mod error;
mod executor;
mod manager;
pub mod operation;
pub mod params;
mod table;
mod transactions;

pub use builders::{ExecuteBuilder, QueryBuilder, QueryOneBuilder};
pub use config::SqlManagerConfig;
pub use entity::{Column, Entity, EntityMap};
pub use error::{Error, ErrorCategory, Result};
pub use manager::SqlManager;
pub use operation::{Changes, Filter, Mutation, Predicate, Values};
pub use params::{ParamValue, Params};
pub use table::Table;

// Re-export commonly used types from dependencies
pub use juego_sql_pool::{Migrator, PoolConfig, PoolStatus};

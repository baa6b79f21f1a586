#![allow(dead_code)]

use juego_sql::{Column, Entity, SqlManager};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntity {
   #[serde(default)]
   pub id: i64,
   pub name: String,
   #[serde(default)]
   pub json_data: Option<JsonValue>,
   #[serde(default)]
   pub counter: i64,
}

impl TestEntity {
   pub fn new(name: &str, counter: i64) -> Self {
      Self {
         id: 0,
         name: name.to_string(),
         json_data: None,
         counter,
      }
   }
}

impl Entity for TestEntity {
   const TABLE: &'static str = "test_entities";
   const COLUMNS: &'static [Column] = &[
      Column::new("id").generated(),
      Column::new("name"),
      Column::new("json_data").json(),
      Column::new("counter"),
   ];
}

const CREATE_TABLE: &str = "CREATE TABLE test_entities (
   id INTEGER PRIMARY KEY AUTOINCREMENT,
   name TEXT NOT NULL,
   json_data JSON,
   counter INTEGER NOT NULL DEFAULT 0
)";

/// File-backed manager with `test_entities` created and registered.
pub async fn create_test_db(name: &str) -> (SqlManager, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db = SqlManager::connect(temp_dir.path().join(name), None)
      .await
      .expect("Failed to connect to test database");

   prepare(&db).await;
   (db, temp_dir)
}

/// In-memory manager with `test_entities` created and registered.
pub async fn create_memory_db() -> SqlManager {
   let db = SqlManager::connect(":memory:", None)
      .await
      .expect("Failed to open in-memory database");

   prepare(&db).await;
   db
}

async fn prepare(db: &SqlManager) {
   db.register::<TestEntity>().unwrap();
   db.execute(CREATE_TABLE).await.unwrap();
}

pub async fn count(db: &SqlManager) -> i64 {
   db.query_one::<i64>("SELECT COUNT(*) FROM test_entities")
      .await
      .unwrap()
      .unwrap()
}

/// Wait for every pooled connection to be returned; completes asynchronously after a drop.
pub async fn wait_for_release(db: &SqlManager) -> bool {
   for _ in 0..50 {
      if db.pool_status().in_use() == 0 {
         return true;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
   }
   false
}

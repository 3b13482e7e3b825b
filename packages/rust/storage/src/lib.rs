//! libSQL storage layer and CSV result sink for judgeloop.
//!
//! The [`Storage`] struct wraps a local libSQL database holding users,
//! enrollments, chat histories, and the course vector index. Each concern is
//! exposed through a trait ([`UserStore`], [`ChatHistoryStore`],
//! [`CourseIndex`]) so callers can substitute their own backends.
//!
//! Processed cases go to a CSV file through [`CsvSink`] instead.

mod chat;
mod courses;
mod migrations;
mod sink;
mod users;

use std::path::Path;

use judgeloop_shared::{JudgeloopError, Result};
use libsql::{Connection, Database, params};

pub use chat::ChatHistoryStore;
pub use courses::{CourseIndex, IndexedCourse, cosine_similarity};
pub use sink::{CASE_ID_COLUMN, CsvSink};
pub use users::UserStore;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| JudgeloopError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        JudgeloopError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

pub(crate) fn db_err(e: libsql::Error) -> JudgeloopError {
    JudgeloopError::Storage(e.to_string())
}

/// Encode a vector for a TEXT column.
pub(crate) fn encode_vector(vector: &[f32]) -> Result<String> {
    serde_json::to_string(vector).map_err(|e| JudgeloopError::Storage(e.to_string()))
}

pub(crate) fn decode_vector(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw)
        .map_err(|e| JudgeloopError::Storage(format!("corrupt vector column: {e}")))
}


#[cfg(test)]
mod tests {
    use super::test_support::test_storage;
    use super::*;

    #[tokio::test]
    async fn open_and_migrate() {
        let (_dir, storage) = test_storage().await;
        assert_eq!(storage.schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("judgeloop.db");
        let first = Storage::open(&path).await.expect("first open");
        drop(first);
        let second = Storage::open(&path).await.expect("second open");
        assert_eq!(second.schema_version().await, 2);
    }

    #[test]
    fn vector_encoding() {
        let encoded = encode_vector(&[0.25, -1.0]).unwrap();
        assert_eq!(decode_vector(&encoded).unwrap(), vec![0.25, -1.0]);
        assert!(decode_vector("not json").is_err());
    }
}

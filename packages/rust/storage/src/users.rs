//! Learner accounts, enrollments, and preference vectors.

use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use judgeloop_shared::{JudgeloopError, Result};

use crate::{Storage, db_err, decode_vector, encode_vector};

/// Per-user credentials, enrolled courses, and preference embedding.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account with a zero preference vector of `embedding_dim`.
    /// Fails with `Conflict` if the email is taken.
    async fn register(&self, email: &str, password: &str, embedding_dim: usize) -> Result<()>;

    /// Check credentials. Unknown emails verify as `false`.
    async fn verify(&self, email: &str, password: &str) -> Result<bool>;

    /// Enrolled course ids, oldest first.
    async fn enrolled(&self, email: &str) -> Result<Vec<u64>>;

    /// Add a course to the user's enrollments. Re-enrolling is a no-op.
    async fn enroll(&self, email: &str, course_id: u64) -> Result<()>;

    async fn preference(&self, email: &str) -> Result<Vec<f32>>;

    async fn set_preference(&self, email: &str, vector: &[f32]) -> Result<()>;
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Storage {
    /// `NotFound` unless a `users` row exists for `email`.
    pub(crate) async fn require_user(&self, email: &str) -> Result<()> {
        let mut rows = self
            .conn()
            .query("SELECT 1 FROM users WHERE email = ?1", params![email])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(_) => Ok(()),
            None => Err(JudgeloopError::NotFound(format!("user '{email}'"))),
        }
    }
}

#[async_trait]
impl UserStore for Storage {
    async fn register(&self, email: &str, password: &str, embedding_dim: usize) -> Result<()> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(JudgeloopError::validation("email and password are required"));
        }
        if self.require_user(email).await.is_ok() {
            return Err(JudgeloopError::Conflict(format!(
                "user '{email}' already exists"
            )));
        }

        let salt = Uuid::now_v7().simple().to_string();
        let hash = hash_password(&salt, password);
        let embedding = encode_vector(&vec![0.0; embedding_dim])?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO users (email, password_salt, password_hash, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![email, salt.as_str(), hash.as_str(), embedding.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        tracing::info!(email, "user registered");
        Ok(())
    }

    async fn verify(&self, email: &str, password: &str) -> Result<bool> {
        let mut rows = self
            .conn()
            .query(
                "SELECT password_salt, password_hash FROM users WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let salt: String = row.get(0).map_err(db_err)?;
                let stored: String = row.get(1).map_err(db_err)?;
                Ok(hash_password(&salt, password) == stored)
            }
            None => Ok(false),
        }
    }

    async fn enrolled(&self, email: &str) -> Result<Vec<u64>> {
        self.require_user(email).await?;
        let mut rows = self
            .conn()
            .query(
                "SELECT course_id FROM enrollments WHERE email = ?1 ORDER BY rowid",
                params![email],
            )
            .await
            .map_err(db_err)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: i64 = row.get(0).map_err(db_err)?;
            ids.push(id as u64);
        }
        Ok(ids)
    }

    async fn enroll(&self, email: &str, course_id: u64) -> Result<()> {
        self.require_user(email).await?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO enrollments (email, course_id, enrolled_at)
                 VALUES (?1, ?2, ?3)",
                params![email, course_id as i64, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn preference(&self, email: &str) -> Result<Vec<f32>> {
        let mut rows = self
            .conn()
            .query("SELECT embedding FROM users WHERE email = ?1", params![email])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let raw: String = row.get(0).map_err(db_err)?;
                decode_vector(&raw)
            }
            None => Err(JudgeloopError::NotFound(format!("user '{email}'"))),
        }
    }

    async fn set_preference(&self, email: &str, vector: &[f32]) -> Result<()> {
        let encoded = encode_vector(vector)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE users SET embedding = ?1 WHERE email = ?2",
                params![encoded.as_str(), email],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(JudgeloopError::NotFound(format!("user '{email}'")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;

    #[tokio::test]
    async fn register_then_verify() {
        let (_dir, storage) = test_storage().await;
        storage.register("ana@example.com", "s3cret", 4).await.unwrap();

        assert!(storage.verify("ana@example.com", "s3cret").await.unwrap());
        assert!(!storage.verify("ana@example.com", "wrong").await.unwrap());
        assert!(!storage.verify("nobody@example.com", "s3cret").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (_dir, storage) = test_storage().await;
        storage.register("ana@example.com", "a", 4).await.unwrap();
        let err = storage.register("ana@example.com", "b", 4).await.unwrap_err();
        assert!(matches!(err, JudgeloopError::Conflict(_)));
    }

    #[tokio::test]
    async fn passwords_are_salted() {
        let (_dir, storage) = test_storage().await;
        storage.register("a@example.com", "same", 2).await.unwrap();
        storage.register("b@example.com", "same", 2).await.unwrap();

        let mut rows = storage
            .conn()
            .query("SELECT password_hash FROM users ORDER BY email", params![])
            .await
            .unwrap();
        let first: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        let second: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_ne!(first, second);
        assert_ne!(first, "same");
    }

    #[tokio::test]
    async fn new_users_start_with_zero_preference() {
        let (_dir, storage) = test_storage().await;
        storage.register("ana@example.com", "pw", 768).await.unwrap();
        let pref = storage.preference("ana@example.com").await.unwrap();
        assert_eq!(pref.len(), 768);
        assert!(pref.iter().all(|v| *v == 0.0));

        storage
            .set_preference("ana@example.com", &[1.0, 2.0])
            .await
            .unwrap();
        assert_eq!(
            storage.preference("ana@example.com").await.unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[tokio::test]
    async fn enrollments_keep_order_and_ignore_repeats() {
        let (_dir, storage) = test_storage().await;
        storage.register("ana@example.com", "pw", 2).await.unwrap();
        storage.enroll("ana@example.com", 7).await.unwrap();
        storage.enroll("ana@example.com", 3).await.unwrap();
        storage.enroll("ana@example.com", 7).await.unwrap();
        assert_eq!(storage.enrolled("ana@example.com").await.unwrap(), vec![7, 3]);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_dir, storage) = test_storage().await;
        assert!(matches!(
            storage.enroll("ghost@example.com", 1).await.unwrap_err(),
            JudgeloopError::NotFound(_)
        ));
        assert!(matches!(
            storage.set_preference("ghost@example.com", &[0.0]).await.unwrap_err(),
            JudgeloopError::NotFound(_)
        ));
    }
}

//! Course catalogue with embedding vectors and cosine similarity search.
//!
//! Vectors live next to the course payload as JSON arrays. Search is a full
//! scan scored in process.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use libsql::params;

use judgeloop_shared::{Course, JudgeloopError, Result, ScoredCourse};

use crate::{Storage, db_err, decode_vector, encode_vector};

/// A course together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedCourse {
    pub course: Course,
    pub vector: Vec<f32>,
}

/// Vector index over the course catalogue.
#[async_trait]
pub trait CourseIndex: Send + Sync {
    /// Insert or replace courses by id.
    async fn upsert(&self, courses: &[IndexedCourse]) -> Result<()>;

    /// Up to `limit` courses by descending cosine similarity, skipping `exclude_ids`.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        exclude_ids: &[u64],
    ) -> Result<Vec<ScoredCourse>>;

    /// Courses with the given ids, in request order. Unknown ids are skipped.
    async fn retrieve(&self, ids: &[u64]) -> Result<Vec<IndexedCourse>>;

    async fn count(&self) -> Result<u64>;
}

/// Cosine similarity; `0.0` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn row_to_indexed(row: &libsql::Row) -> Result<IndexedCourse> {
    let payload: String = row.get(0).map_err(db_err)?;
    let vector: String = row.get(1).map_err(db_err)?;
    let course: Course = serde_json::from_str(&payload)
        .map_err(|e| JudgeloopError::Storage(format!("corrupt course payload: {e}")))?;
    Ok(IndexedCourse {
        course,
        vector: decode_vector(&vector)?,
    })
}

#[async_trait]
impl CourseIndex for Storage {
    async fn upsert(&self, courses: &[IndexedCourse]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for entry in courses {
            let payload = serde_json::to_string(&entry.course)
                .map_err(|e| JudgeloopError::Storage(e.to_string()))?;
            let vector = encode_vector(&entry.vector)?;
            self.conn()
                .execute(
                    "INSERT INTO courses (id, payload, vector, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                       payload = excluded.payload,
                       vector = excluded.vector,
                       updated_at = excluded.updated_at",
                    params![
                        entry.course.id as i64,
                        payload.as_str(),
                        vector.as_str(),
                        now.as_str()
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        tracing::debug!(count = courses.len(), "courses upserted");
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        exclude_ids: &[u64],
    ) -> Result<Vec<ScoredCourse>> {
        let excluded: HashSet<u64> = exclude_ids.iter().copied().collect();
        let mut rows = self
            .conn()
            .query("SELECT payload, vector FROM courses", params![])
            .await
            .map_err(db_err)?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let entry = row_to_indexed(&row)?;
            if excluded.contains(&entry.course.id) {
                continue;
            }
            let score = cosine_similarity(vector, &entry.vector);
            scored.push(ScoredCourse {
                course: entry.course,
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.course.id.cmp(&b.course.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn retrieve(&self, ids: &[u64]) -> Result<Vec<IndexedCourse>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let mut rows = self
                .conn()
                .query(
                    "SELECT payload, vector FROM courses WHERE id = ?1",
                    params![*id as i64],
                )
                .await
                .map_err(db_err)?;
            if let Some(row) = rows.next().await.map_err(db_err)? {
                found.push(row_to_indexed(&row)?);
            }
        }
        Ok(found)
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM courses", params![])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            None => Ok(0),
        }
    }
}

//! Course recommendations from a per-user preference vector, plus the
//! catalogue import that fills the vector index.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use judgeloop_llm::Embedder;
use judgeloop_shared::{Course, JudgeloopError, RecommenderConfig, Result, ScoredCourse};
use judgeloop_storage::{ChatHistoryStore, CourseIndex, IndexedCourse, UserStore};

/// Courses embedded per request during import.
pub const IMPORT_BATCH_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Recommender
// ---------------------------------------------------------------------------

pub struct Recommender {
    users: Arc<dyn UserStore>,
    histories: Arc<dyn ChatHistoryStore>,
    index: Arc<dyn CourseIndex>,
    embedding_dim: usize,
    limit: usize,
    greeting: String,
}

impl Recommender {
    pub fn new(
        users: Arc<dyn UserStore>,
        histories: Arc<dyn ChatHistoryStore>,
        index: Arc<dyn CourseIndex>,
        config: &RecommenderConfig,
    ) -> Self {
        Self {
            users,
            histories,
            index,
            embedding_dim: config.embedding_dim,
            limit: config.recommend_limit,
            greeting: config.greeting.clone(),
        }
    }

    /// Create the account and its greeting-seeded conversation.
    #[instrument(skip_all, fields(email))]
    pub async fn register(&self, email: &str, password: &str) -> Result<()> {
        self.users
            .register(email, password, self.embedding_dim)
            .await?;
        self.histories.create(email, &self.greeting).await?;
        info!("user registered");
        Ok(())
    }

    /// Fail unless the credentials match a registered user.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        if self.users.verify(email, password).await? {
            Ok(())
        } else {
            warn!(email, "rejected login");
            Err(JudgeloopError::validation("invalid email or password"))
        }
    }

    /// Courses closest to the user's preference, excluding enrolled ones.
    #[instrument(skip_all, fields(email))]
    pub async fn recommend(&self, email: &str) -> Result<Vec<ScoredCourse>> {
        let enrolled = self.users.enrolled(email).await?;
        let preference = self.users.preference(email).await?;
        let courses = self
            .index
            .search(&preference, self.limit, &enrolled)
            .await?;
        info!(
            enrolled = enrolled.len(),
            recommended = courses.len(),
            "recommendations ready"
        );
        Ok(courses)
    }

    /// Move the user's preference halfway toward a course's vector.
    ///
    /// Returns the new preference.
    #[instrument(skip_all, fields(email, course_id))]
    pub async fn learn_from_course(&self, email: &str, course_id: u64) -> Result<Vec<f32>> {
        let course = self.require_course(course_id).await?;
        let current = self.users.preference(email).await?;
        if current.len() != course.vector.len() {
            return Err(JudgeloopError::validation(format!(
                "preference has {} dimensions but course {course_id} has {}",
                current.len(),
                course.vector.len()
            )));
        }
        let updated = mean_vector(&current, &course.vector);
        self.users.set_preference(email, &updated).await?;
        info!("preference updated");
        Ok(updated)
    }

    /// Record an enrollment in an existing course.
    pub async fn enroll(&self, email: &str, course_id: u64) -> Result<()> {
        self.require_course(course_id).await?;
        self.users.enroll(email, course_id).await?;
        info!(email, course_id, "enrolled");
        Ok(())
    }

    /// Enrolled courses, in enrollment order.
    pub async fn my_courses(&self, email: &str) -> Result<Vec<Course>> {
        let ids = self.users.enrolled(email).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let courses = self.index.retrieve(&ids).await?;
        Ok(courses.into_iter().map(|c| c.course).collect())
    }

    async fn require_course(&self, course_id: u64) -> Result<IndexedCourse> {
        self.index
            .retrieve(&[course_id])
            .await?
            .pop()
            .ok_or_else(|| JudgeloopError::NotFound(format!("course {course_id}")))
    }
}

/// Element-wise mean of two equal-length vectors.
pub fn mean_vector(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()
}

// ---------------------------------------------------------------------------
// Catalogue import
// ---------------------------------------------------------------------------

/// One row of the course catalogue CSV. Spanish headers are accepted too.
#[derive(Debug, Deserialize)]
struct CourseRow {
    #[serde(alias = "Nombre")]
    name: String,
    #[serde(alias = "Nivel")]
    level: String,
    #[serde(alias = "duracion", alias = "Duracion")]
    duration: String,
    #[serde(alias = "Formato")]
    format: String,
    #[serde(alias = "Instructor")]
    instructor: String,
    #[serde(default, alias = "FechaInicio")]
    start_date: String,
    #[serde(alias = "Descripcion")]
    description: String,
}

impl CourseRow {
    fn into_course(self, id: u64) -> Course {
        Course {
            id,
            name: self.name,
            level: self.level,
            duration: self.duration,
            format: self.format,
            instructor: self.instructor,
            start_date: self.start_date,
            description: self.description,
        }
    }
}

/// Text embedded for a course.
pub fn course_embedding_text(course: &Course) -> String {
    format!(
        "Nombre: {}. Nivel: {}. Duración: {}. Formato: {}. Instructor: {}. Descripción: {}",
        course.name,
        course.level,
        course.duration,
        course.format,
        course.instructor,
        course.description
    )
}

/// Parse a catalogue. Ids are 0-based row indices.
pub fn parse_courses<R: Read>(reader: R) -> Result<Vec<Course>> {
    let mut rows = csv::Reader::from_reader(reader);
    rows.deserialize::<CourseRow>()
        .enumerate()
        .map(|(i, row)| {
            row.map(|r| r.into_course(i as u64))
                .map_err(|e| JudgeloopError::parse(format!("course row {i}: {e}")))
        })
        .collect()
}

/// Embed and index every course in a catalogue file.
///
/// Returns the number of courses written.
pub async fn import_courses(
    path: &Path,
    embedder: &dyn Embedder,
    index: &dyn CourseIndex,
) -> Result<usize> {
    let file = std::fs::File::open(path).map_err(|e| JudgeloopError::io(path, e))?;
    let courses = parse_courses(file)?;
    import_parsed(courses, embedder, index, IMPORT_BATCH_SIZE).await
}

#[instrument(skip_all, fields(courses = courses.len(), batch_size))]
async fn import_parsed(
    courses: Vec<Course>,
    embedder: &dyn Embedder,
    index: &dyn CourseIndex,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = batch_size.max(1);
    let batches = courses.len().div_ceil(batch_size);
    for (n, chunk) in courses.chunks(batch_size).enumerate() {
        info!(batch = n + 1, batches, "embedding courses");
        let texts: Vec<String> = chunk.iter().map(course_embedding_text).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunk.len() {
            return Err(JudgeloopError::Generation(format!(
                "expected {} embeddings, got {}",
                chunk.len(),
                vectors.len()
            )));
        }
        let indexed: Vec<IndexedCourse> = chunk
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(course, vector)| IndexedCourse { course, vector })
            .collect();
        index.upsert(&indexed).await?;
    }
    info!(count = courses.len(), "catalogue imported");
    Ok(courses.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use judgeloop_llm::GeneratorError;
    use judgeloop_storage::Storage;
    use std::sync::Mutex;

    const CATALOGUE: &str = "\
name,level,duration,format,instructor,start_date,description
Python desde cero,Básico,30 horas,Online,Ana Gómez,2025-09-01,Fundamentos de Python
Redes,Intermedio,40 horas,Presencial,Luis Pérez,2025-10-01,Protocolos TCP/IP
Machine Learning,Avanzado,60 horas,Online,Marta Ruiz,2025-11-01,Modelos supervisados
";

    /// Maps each text to a vector from a keyword table and records batch sizes.
    struct KeywordEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, GeneratorError> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("Python") {
                        vec![1.0, 0.0, 0.0]
                    } else if t.contains("Redes") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![0.6, 0.0, 0.8]
                    }
                })
                .collect())
        }
    }

    fn config() -> RecommenderConfig {
        RecommenderConfig {
            embedding_dim: 3,
            recommend_limit: 2,
            ..RecommenderConfig::default()
        }
    }

    async fn setup() -> (tempfile::TempDir, Arc<Storage>, Recommender) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("rec.db")).await.unwrap());
        let courses = parse_courses(CATALOGUE.as_bytes()).unwrap();
        import_parsed(courses, &KeywordEmbedder::new(), storage.as_ref(), 10)
            .await
            .unwrap();
        let recommender = Recommender::new(
            storage.clone(),
            storage.clone(),
            storage.clone(),
            &config(),
        );
        recommender.register("ana@example.com", "s3cret").await.unwrap();
        (dir, storage, recommender)
    }

    #[test]
    fn embedding_text_lists_course_fields() {
        let course = parse_courses(CATALOGUE.as_bytes()).unwrap().remove(0);
        assert_eq!(
            course_embedding_text(&course),
            "Nombre: Python desde cero. Nivel: Básico. Duración: 30 horas. Formato: Online. \
             Instructor: Ana Gómez. Descripción: Fundamentos de Python"
        );
    }

    #[test]
    fn parse_uses_row_index_ids_and_spanish_headers() {
        let csv = "Nombre,Nivel,duracion,Formato,Instructor,FechaInicio,Descripcion\n\
                   A,Básico,1h,Online,X,2025-01-01,d1\n\
                   B,Básico,2h,Online,Y,2025-01-02,d2\n";
        let courses = parse_courses(csv.as_bytes()).unwrap();
        assert_eq!(courses[0].id, 0);
        assert_eq!(courses[1].id, 1);
        assert_eq!(courses[1].start_date, "2025-01-02");
    }

    #[test]
    fn parse_rejects_rows_missing_columns() {
        let err = parse_courses("name,level\nA,Básico\n".as_bytes()).unwrap_err();
        assert!(matches!(err, JudgeloopError::Parse { .. }));
    }

    #[test]
    fn mean_is_element_wise() {
        assert_eq!(mean_vector(&[0.0, 1.0], &[1.0, 0.0]), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn import_embeds_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("rec.db")).await.unwrap();
        let embedder = KeywordEmbedder::new();
        let courses = parse_courses(CATALOGUE.as_bytes()).unwrap();

        let written = import_parsed(courses, &embedder, &storage, 2).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2, 1]);
        assert_eq!(storage.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn register_seeds_chat_history() {
        let (_dir, storage, recommender) = setup().await;
        let history = storage.load("ana@example.com").await.unwrap().unwrap();
        assert_eq!(history.messages.len(), 1);

        let err = recommender
            .register("ana@example.com", "other")
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeloopError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_checks_password() {
        let (_dir, _storage, recommender) = setup().await;
        assert!(recommender.login("ana@example.com", "s3cret").await.is_ok());
        assert!(recommender.login("ana@example.com", "nope").await.is_err());
        assert!(recommender.login("bob@example.com", "s3cret").await.is_err());
    }

    #[tokio::test]
    async fn learning_steers_recommendations_and_enrollment_excludes() {
        let (_dir, _storage, recommender) = setup().await;

        let updated = recommender
            .learn_from_course("ana@example.com", 0)
            .await
            .unwrap();
        assert_eq!(updated, vec![0.5, 0.0, 0.0]);

        let recs = recommender.recommend("ana@example.com").await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].course.id, 0);

        recommender.enroll("ana@example.com", 0).await.unwrap();
        let recs = recommender.recommend("ana@example.com").await.unwrap();
        assert!(recs.iter().all(|c| c.course.id != 0));
        assert_eq!(recs[0].course.id, 2);

        let mine = recommender.my_courses("ana@example.com").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Python desde cero");
    }

    #[tokio::test]
    async fn unknown_course_is_not_found() {
        let (_dir, _storage, recommender) = setup().await;
        let err = recommender
            .enroll("ana@example.com", 99)
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeloopError::NotFound(_)));
        let err = recommender
            .learn_from_course("ana@example.com", 99)
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeloopError::NotFound(_)));
    }

    #[tokio::test]
    async fn new_user_has_no_courses() {
        let (_dir, _storage, recommender) = setup().await;
        assert!(recommender.my_courses("ana@example.com").await.unwrap().is_empty());
    }
}

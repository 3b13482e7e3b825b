//! Chat query pipeline: classify intent, then answer directly or search,
//! re-rank, and return courses.
//!
//! Unlike the case pipeline there is no judge here. Each generator is called
//! once per query and its failure is the query's failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use judgeloop_llm::{Embedder, JsonGenerator, LlmClient, ResponseSchema, StructuredGenerator};
use judgeloop_shared::{
    AppConfig, ChatHistory, ChatMessage, JudgeloopError, Result, ScoredCourse,
};
use judgeloop_storage::{ChatHistoryStore, CourseIndex};

use crate::prompts;

/// Assistant reply recorded when re-ranking keeps no course.
pub const NO_RESULTS_REPLY: &str = "Lo siento pero no he encontrado cursos que puedan ayudarte";

// ---------------------------------------------------------------------------
// Structured outputs
// ---------------------------------------------------------------------------

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    #[serde(rename = "busqueda general", alias = "general")]
    General,
    #[serde(rename = "busqueda de cursos", alias = "course_search")]
    CourseSearch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub keywords: String,
    #[serde(rename = "busqueda", alias = "intent")]
    pub intent: Intent,
}

impl ResponseSchema for QueryIntent {
    const NAME: &'static str = "query_intent";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keywords": {"type": "string"},
                "busqueda": {"type": "string", "enum": ["busqueda general", "busqueda de cursos"]}
            },
            "required": ["keywords", "busqueda"],
            "additionalProperties": false
        })
    }
}

/// Direct answer for general questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralAnswer {
    #[serde(rename = "respuesta", alias = "answer")]
    pub answer: String,
}

impl ResponseSchema for GeneralAnswer {
    const NAME: &'static str = "general_answer";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"respuesta": {"type": "string"}},
            "required": ["respuesta"],
            "additionalProperties": false
        })
    }
}

/// Course ids kept by the re-ranker, best first.
///
/// Accepts `{"ids": [...]}` or a bare array; ids may be numbers or numeric
/// strings. Anything else in the list is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RerankShape")]
pub struct RerankedIds {
    pub ids: Vec<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RerankShape {
    Wrapped { ids: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl From<RerankShape> for RerankedIds {
    fn from(shape: RerankShape) -> Self {
        let raw = match shape {
            RerankShape::Wrapped { ids } | RerankShape::Bare(ids) => ids,
        };
        let ids = raw
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect();
        Self { ids }
    }
}

impl ResponseSchema for RerankedIds {
    const NAME: &'static str = "reranked_ids";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "ids": {"type": "array", "items": {"type": "integer"}}
            },
            "required": ["ids"],
            "additionalProperties": false
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Result of one chat query.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatAnswer {
    Text(String),
    /// Courses in re-ranker order. Never empty.
    Courses(Vec<ScoredCourse>),
    /// Course search ran but nothing relevant was kept.
    NoResults,
}

impl ChatAnswer {
    /// Assistant message stored in the conversation history.
    pub fn history_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Courses(courses) => {
                let names: Vec<String> = courses
                    .iter()
                    .map(|c| format!("'Curso: {}'", c.course.name))
                    .collect();
                format!("[{}]", names.join(", "))
            }
            Self::NoResults => NO_RESULTS_REPLY.to_string(),
        }
    }
}

/// Map re-ranked ids back to candidates, keeping the re-ranker's order.
///
/// Ids absent from the candidates and repeated ids are dropped.
pub fn resolve_ranked(ids: &[u64], candidates: &[ScoredCourse]) -> Vec<ScoredCourse> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| candidates.iter().find(|c| c.course.id == *id).cloned())
        .collect()
}

pub struct ChatPipeline {
    intent: Arc<dyn StructuredGenerator<QueryIntent>>,
    general: Arc<dyn StructuredGenerator<GeneralAnswer>>,
    reranker: Arc<dyn StructuredGenerator<RerankedIds>>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn CourseIndex>,
    search_limit: usize,
}

impl ChatPipeline {
    pub fn new(
        intent: Arc<dyn StructuredGenerator<QueryIntent>>,
        general: Arc<dyn StructuredGenerator<GeneralAnswer>>,
        reranker: Arc<dyn StructuredGenerator<RerankedIds>>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn CourseIndex>,
        search_limit: usize,
    ) -> Self {
        Self {
            intent,
            general,
            reranker,
            embedder,
            index,
            search_limit,
        }
    }

    /// Wire the three chat roles to the `[chat]` endpoint.
    pub fn from_config(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn CourseIndex>,
    ) -> Result<Self> {
        let client = LlmClient::from_endpoint(&config.chat)?;
        Ok(Self::new(
            Arc::new(JsonGenerator::<QueryIntent>::new(
                client.clone(),
                prompts::intent_role(),
            )),
            Arc::new(JsonGenerator::<GeneralAnswer>::new(
                client.clone(),
                prompts::general_role(),
            )),
            Arc::new(JsonGenerator::<RerankedIds>::new(
                client,
                prompts::rerank_role(),
            )),
            embedder,
            index,
            config.recommender.search_limit,
        ))
    }

    /// Answer `query` in the context of `history`.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn answer(&self, query: &str, history: &[ChatMessage]) -> Result<ChatAnswer> {
        if query.trim().is_empty() {
            return Err(JudgeloopError::validation("query is empty"));
        }
        let history_json = serde_json::to_string(history)
            .map_err(|e| JudgeloopError::parse(e.to_string()))?;
        let prompt = prompts::chat_prompt(&history_json, query);

        let intent = self.intent.generate(&prompt).await?;
        info!(keywords = %intent.keywords, intent = ?intent.intent, "query classified");

        if intent.intent == Intent::General {
            let reply = self.general.generate(&prompt).await?;
            return Ok(ChatAnswer::Text(reply.answer));
        }

        let vector = self.embedder.embed(&intent.keywords).await?;
        let candidates = self.index.search(&vector, self.search_limit, &[]).await?;
        info!(candidates = candidates.len(), "vector search finished");
        if candidates.is_empty() {
            return Ok(ChatAnswer::NoResults);
        }

        let candidates_json = serde_json::to_string(&candidates)
            .map_err(|e| JudgeloopError::parse(e.to_string()))?;
        let ranked = self
            .reranker
            .generate(&prompts::rerank_prompt(&prompt, &candidates_json))
            .await?;
        debug!(ids = ?ranked.ids, "re-ranker selection");

        let courses = resolve_ranked(&ranked.ids, &candidates);
        if courses.is_empty() {
            info!("re-ranker kept no courses");
            return Ok(ChatAnswer::NoResults);
        }
        Ok(ChatAnswer::Courses(courses))
    }
}

/// A chat pipeline bound to persisted per-user conversations.
pub struct ChatSession {
    pipeline: ChatPipeline,
    histories: Arc<dyn ChatHistoryStore>,
    greeting: String,
}

impl ChatSession {
    pub fn new(
        pipeline: ChatPipeline,
        histories: Arc<dyn ChatHistoryStore>,
        greeting: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            histories,
            greeting: greeting.into(),
        }
    }

    /// The user's conversation, created with the greeting if absent.
    ///
    /// Fails with `NotFound` for an unregistered user.
    pub async fn history(&self, email: &str) -> Result<ChatHistory> {
        match self.histories.load(email).await? {
            Some(history) => Ok(history),
            None => self.histories.create(email, &self.greeting).await,
        }
    }

    /// Answer a query and record the exchange.
    ///
    /// Nothing is recorded when the pipeline fails, so a retry starts from
    /// the same history.
    #[instrument(skip_all, fields(email))]
    pub async fn ask(&self, email: &str, query: &str) -> Result<ChatAnswer> {
        let history = self.history(email).await?;
        let answer = self.pipeline.answer(query, &history.messages).await?;
        self.histories
            .append(
                email,
                &[
                    ChatMessage::user(query),
                    ChatMessage::assistant(answer.history_text()),
                ],
            )
            .await?;
        Ok(answer)
    }

    pub async fn clear(&self, email: &str) -> Result<ChatHistory> {
        self.histories.clear(email, &self.greeting).await
    }
}

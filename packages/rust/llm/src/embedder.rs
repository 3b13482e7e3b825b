//! Text embedding behind a trait so search and tests can swap backends.

use async_trait::async_trait;
use tracing::instrument;

use crate::client::LlmClient;
use crate::error::GeneratorError;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector dimension every result has.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GeneratorError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GeneratorError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| GeneratorError::Generation("embedder returned no vector".into()))
    }
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct TextEmbedder {
    client: LlmClient,
    dimension: usize,
}

impl TextEmbedder {
    pub fn new(client: LlmClient, dimension: usize) -> Self {
        Self { client, dimension }
    }
}

#[async_trait]
impl Embedder for TextEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip_all, fields(count = texts.len(), dim = self.dimension))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GeneratorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.client.embed(texts, Some(self.dimension)).await?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(GeneratorError::Generation(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.len()
            )));
        }
        Ok(vectors)
    }
}

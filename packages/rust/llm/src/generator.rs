//! Structured generators: a role, a prompt in, a schema-validated value out.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::client::{LlmClient, ResponseFormat};
use crate::error::GeneratorError;

/// Anything that turns a prompt into a typed value.
///
/// Implementations must be safe to call repeatedly; each call is independent
/// and carries no conversation state.
#[async_trait]
pub trait StructuredGenerator<T>: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<T, GeneratorError>;
}

/// Output types that can be requested from a model as JSON.
pub trait ResponseSchema: DeserializeOwned + Send + 'static {
    /// Schema name sent with the structured-output request.
    const NAME: &'static str;

    /// JSON Schema the model output must satisfy.
    fn schema() -> serde_json::Value;
}

/// Fixed system-side identity of a generator.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub instructions: String,
}

impl Role {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

/// A model-backed generator that requests JSON and parses it into `T`.
pub struct JsonGenerator<T> {
    client: LlmClient,
    role: Role,
    _output: PhantomData<fn() -> T>,
}

impl<T> JsonGenerator<T> {
    pub fn new(client: LlmClient, role: Role) -> Self {
        Self {
            client,
            role,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<T: ResponseSchema> StructuredGenerator<T> for JsonGenerator<T> {
    #[instrument(skip_all, fields(role = %self.role.name, model = %self.client.model()))]
    async fn generate(&self, prompt: &str) -> Result<T, GeneratorError> {
        let format = ResponseFormat::json_schema(T::NAME, T::schema());
        let text = self
            .client
            .complete(&self.role.instructions, prompt, Some(&format))
            .await?;
        let value = parse_json_output(&text)?;
        debug!(schema = T::NAME, "structured output parsed");
        Ok(value)
    }
}

/// Parse cleaned model text as `T`.
///
/// Falls back to the outermost `{...}` or `[...]` span when the model wraps
/// the JSON in prose.
pub fn parse_json_output<T: DeserializeOwned>(text: &str) -> Result<T, GeneratorError> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(first) => {
            if let Some(span) = json_span(text) {
                if let Ok(value) = serde_json::from_str(span) {
                    return Ok(value);
                }
            }
            Err(GeneratorError::Generation(format!(
                "output does not match schema: {first}"
            )))
        }
    }
}

fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

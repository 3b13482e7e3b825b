//! HTTP client for OpenAI-compatible chat completion and embedding APIs.
//!
//! Works against Ollama's `/v1` endpoint, OpenAI, OpenRouter, and any other
//! server speaking the same protocol. Each call is a single request: retries
//! belong to the caller.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use judgeloop_shared::{JudgeloopError, ModelEndpoint};

use crate::error::GeneratorError;

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("judgeloop/", env!("CARGO_PKG_VERSION"));

/// Connection establishment deadline. Whole-call deadlines are set by the caller.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest slice of an error body echoed into error messages.
const MAX_ERROR_BODY: usize = 300;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ResponseFormat>,
    stream: bool,
}

#[derive(Debug, serde::Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

/// Structured-output request: the model must answer with JSON matching `schema`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Clone, serde::Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

impl ResponseFormat {
    pub fn json_schema(name: &str, schema: serde_json::Value) -> Self {
        Self {
            kind: "json_schema",
            json_schema: JsonSchemaFormat {
                name: name.to_string(),
                schema,
                strict: true,
            },
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A configured connection to one model on one endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmClient {
    /// Build a client from a config section, resolving the API key from the environment.
    pub fn from_endpoint(endpoint: &ModelEndpoint) -> judgeloop_shared::Result<Self> {
        let mut client = Self::new(endpoint.base_url()?, &endpoint.model, endpoint.api_key()?)?;
        client.temperature = endpoint.temperature;
        client.max_tokens = endpoint.max_tokens;
        Ok(client)
    }

    pub fn new(
        base_url: Url,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> judgeloop_shared::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| JudgeloopError::Transport(format!("client build: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Send one system + user exchange and return the assistant's text.
    ///
    /// `<think>` blocks and surrounding code fences are stripped so the
    /// result can be parsed directly when JSON output was requested.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        format: Option<&ResponseFormat>,
    ) -> Result<String, GeneratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: system,
                },
                ChatTurn {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: format,
            stream: false,
        };

        let body = self.post_json(&self.endpoint("chat/completions"), &request).await?;

        let response: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            GeneratorError::Fatal(format!(
                "unexpected chat completion envelope: {e} (got: {})",
                truncate(&body)
            ))
        })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GeneratorError::Generation("model returned no content".into()))?;

        debug!(len = content.len(), "completion received");
        Ok(clean_model_text(&content))
    }

    /// Embed a batch of texts, returning vectors in input order.
    #[instrument(skip_all, fields(model = %self.model, inputs = inputs.len()))]
    pub async fn embed(
        &self,
        inputs: &[String],
        dimensions: Option<usize>,
    ) -> Result<Vec<Vec<f32>>, GeneratorError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions,
        };

        let body = self.post_json(&self.endpoint("embeddings"), &request).await?;

        let mut response: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            GeneratorError::Fatal(format!(
                "unexpected embedding envelope: {e} (got: {})",
                truncate(&body)
            ))
        })?;

        if response.data.len() != inputs.len() {
            return Err(GeneratorError::Generation(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<String, GeneratorError> {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        Ok(text)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GeneratorError {
    if e.is_timeout() {
        GeneratorError::Transport(format!("request timed out: {e}"))
    } else {
        GeneratorError::Transport(e.to_string())
    }
}

/// Map an HTTP failure status onto the retry taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> GeneratorError {
    let detail = format!("HTTP {status}: {}", truncate(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            GeneratorError::Fatal(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            GeneratorError::Transport(detail)
        }
        s if s.is_server_error() => GeneratorError::Transport(detail),
        _ => GeneratorError::Generation(detail),
    }
}

/// Strip reasoning preambles and markdown fences from model text.
pub(crate) fn clean_model_text(content: &str) -> String {
    let without_think = THINK_BLOCK.replace_all(content, "");
    let trimmed = without_think.trim();
    match CODE_FENCE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> LlmClient {
        let base = Url::parse(&format!("{}/v1", server.uri())).unwrap();
        LlmClient::new(base, "test-model", api_key.map(String::from)).unwrap()
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn strips_think_blocks_and_fences() {
        let raw = "<think>let me see\nhmm</think>\n```json\n{\"approved\": true}\n```";
        assert_eq!(clean_model_text(raw), r#"{"approved": true}"#);
        assert_eq!(clean_model_text("  plain  "), "plain");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "no"),
            GeneratorError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GeneratorError::Transport(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            GeneratorError::Transport(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "schema"),
            GeneratorError::Generation(_)
        ));
    }

    #[test]
    fn response_format_serializes() {
        let format = ResponseFormat::json_schema("verdict", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&format).unwrap();
        assert_eq!(json["type"], "json_schema");
        assert_eq!(json["json_schema"]["name"], "verdict");
        assert_eq!(json["json_schema"]["strict"], true);
    }

    #[tokio::test]
    async fn complete_sends_auth_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        let text = client.complete("system", "user", None).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client.complete("s", "u", None).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Transport(_)));
    }

    #[tokio::test]
    async fn foreign_envelope_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client.complete("s", "u", None).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Fatal(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport() {
        let base = Url::parse("http://127.0.0.1:9/v1").unwrap();
        let client = LlmClient::new(base, "m", None).unwrap();
        let err = client.complete("s", "u", None).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Transport(_)));
    }

    #[tokio::test]
    async fn embeddings_are_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let vectors = client
            .embed(&["a".to_string(), "b".to_string()], Some(2))
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}

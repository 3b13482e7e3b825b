//! Application configuration for judgeloop.
//!
//! User config lives at `~/.judgeloop/judgeloop.toml` unless a path is given
//! explicitly. CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{JudgeloopError, Result};
use crate::types::DEFAULT_ID_WIDTH;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "judgeloop.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".judgeloop";

// ---------------------------------------------------------------------------
// Config structs (matching judgeloop.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Case batch settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Model used by the anonymizer and its judge.
    #[serde(default = "default_anonymizer")]
    pub anonymizer: ModelEndpoint,

    /// Model used by the case reviewer and its judge.
    #[serde(default = "default_reviewer")]
    pub reviewer: ModelEndpoint,

    /// Model used by the chat pipeline (intent, re-ranking, general answers).
    #[serde(default = "default_chat")]
    pub chat: ModelEndpoint,

    /// Embedding model for course search.
    #[serde(default = "default_embedding")]
    pub embedding: ModelEndpoint,

    /// Course recommender settings.
    #[serde(default)]
    pub recommender: RecommenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            anonymizer: default_anonymizer(),
            reviewer: default_reviewer(),
            chat: default_chat(),
            embedding: default_embedding(),
            recommender: RecommenderConfig::default(),
        }
    }
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// JSON array of cases (`caseID`, `report`).
    #[serde(default = "default_input_path")]
    pub input_path: String,

    /// CSV result sink.
    #[serde(default = "default_output_path")]
    pub output_path: String,

    /// JSON array of departments (`departmentID`, `description`).
    #[serde(default = "default_departments_path")]
    pub departments_path: String,

    /// Worker attempts per stage before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Deadline for a single generator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Cases processed at once. `1` keeps strict sequential order.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Zero-padded width of case ids.
    #[serde(default = "default_id_width")]
    pub id_width: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_path: default_output_path(),
            departments_path: default_departments_path(),
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_call_timeout_secs(),
            concurrency: default_concurrency(),
            id_width: default_id_width(),
        }
    }
}

impl BatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn default_input_path() -> String {
    "cases.json".into()
}
fn default_output_path() -> String {
    "processed_cases.csv".into()
}
fn default_departments_path() -> String {
    "departments.json".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_concurrency() -> usize {
    1
}
fn default_id_width() -> usize {
    DEFAULT_ID_WIDTH
}

/// An OpenAI-compatible model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// API base, e.g. `http://localhost:11434/v1`.
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    /// Local servers usually need none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model identifier.
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelEndpoint {
    /// Parse `base_url`, rejecting anything that is not an absolute http(s) URL.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            JudgeloopError::config(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(JudgeloopError::config(format!(
                "unsupported scheme '{other}' in base_url '{}'",
                self.base_url
            ))),
        }
    }

    /// Resolve the API key from the environment, if one is configured.
    pub fn api_key(&self) -> Result<Option<String>> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var_name) => match std::env::var(var_name) {
                Ok(val) if !val.is_empty() => Ok(Some(val)),
                _ => Err(JudgeloopError::config(format!(
                    "API key not found for model '{}'. Set the {var_name} environment variable.",
                    self.model
                ))),
            },
        }
    }
}

fn default_anonymizer() -> ModelEndpoint {
    ModelEndpoint {
        base_url: "http://localhost:11434/v1".into(),
        api_key_env: None,
        model: "qwen3:4b".into(),
        temperature: None,
        max_tokens: None,
    }
}

fn default_reviewer() -> ModelEndpoint {
    ModelEndpoint {
        base_url: "https://api.openai.com/v1".into(),
        api_key_env: Some("OPENAI_API_KEY".into()),
        model: "gpt-4o-mini".into(),
        temperature: None,
        max_tokens: None,
    }
}

fn default_chat() -> ModelEndpoint {
    ModelEndpoint {
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        api_key_env: Some("GEMINI_API_KEY".into()),
        model: "gemini-2.0-flash".into(),
        temperature: Some(0.5),
        max_tokens: Some(5000),
    }
}

fn default_embedding() -> ModelEndpoint {
    ModelEndpoint {
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        api_key_env: Some("GEMINI_API_KEY".into()),
        model: "text-embedding-004".into(),
        temperature: None,
        max_tokens: None,
    }
}

/// `[recommender]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommenderConfig {
    /// libSQL database holding users, chat history, and course vectors.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Dimension of course and user preference vectors.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Candidates retrieved per chat course search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Courses returned by a recommendation request.
    #[serde(default = "default_recommend_limit")]
    pub recommend_limit: usize,

    /// First assistant message of every new or cleared conversation.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            embedding_dim: default_embedding_dim(),
            search_limit: default_search_limit(),
            recommend_limit: default_recommend_limit(),
            greeting: default_greeting(),
        }
    }
}

fn default_database_path() -> String {
    "judgeloop.db".into()
}
fn default_embedding_dim() -> usize {
    768
}
fn default_search_limit() -> usize {
    10
}
fn default_recommend_limit() -> usize {
    5
}
fn default_greeting() -> String {
    "¡Hola! ¿En qué puedo ayudarte hoy?".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.judgeloop/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| JudgeloopError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.judgeloop/judgeloop.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| JudgeloopError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        JudgeloopError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject settings the pipelines cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.batch.max_attempts == 0 {
        return Err(JudgeloopError::config("batch.max_attempts must be at least 1"));
    }
    if config.batch.concurrency == 0 {
        return Err(JudgeloopError::config("batch.concurrency must be at least 1"));
    }
    if config.recommender.embedding_dim == 0 {
        return Err(JudgeloopError::config(
            "recommender.embedding_dim must be at least 1",
        ));
    }
    for endpoint in [
        &config.anonymizer,
        &config.reviewer,
        &config.chat,
        &config.embedding,
    ] {
        endpoint.base_url()?;
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| JudgeloopError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| JudgeloopError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| JudgeloopError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_attempts"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.batch.max_attempts, 5);
        assert_eq!(parsed.batch.id_width, 3);
        assert_eq!(parsed.anonymizer.model, "qwen3:4b");
        assert!(parsed.anonymizer.api_key_env.is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[batch]
max_attempts = 2

[reviewer]
base_url = "http://localhost:8080/v1"
model = "local-reviewer"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.batch.max_attempts, 2);
        assert_eq!(config.batch.output_path, "processed_cases.csv");
        assert_eq!(config.reviewer.model, "local-reviewer");
        assert!(config.reviewer.api_key_env.is_none());
        assert_eq!(config.recommender.search_limit, 10);
    }

    #[test]
    fn zero_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judgeloop.toml");
        std::fs::write(&path, "[batch]\nmax_attempts = 0\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn bad_base_url_rejected() {
        let mut endpoint = default_anonymizer();
        endpoint.base_url = "ftp://example.com".into();
        assert!(endpoint.base_url().is_err());
        endpoint.base_url = "not a url".into();
        assert!(endpoint.base_url().is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut endpoint = default_reviewer();
        // Use a unique env var name to avoid interfering with other tests
        endpoint.api_key_env = Some("JL_TEST_NONEXISTENT_KEY_12345".into());
        let result = endpoint.api_key();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        endpoint.api_key_env = None;
        assert!(endpoint.api_key().unwrap().is_none());
    }
}

//! Model access for judgeloop: an OpenAI-compatible client, typed
//! structured-output generators, and text embedders.

pub mod client;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod schemas;

pub use client::{LlmClient, ResponseFormat};
pub use embedder::{Embedder, TextEmbedder};
pub use error::GeneratorError;
pub use generator::{JsonGenerator, ResponseSchema, Role, StructuredGenerator, parse_json_output};

//! Shared types, error model, and configuration for judgeloop.
//!
//! This crate is the foundation depended on by all other judgeloop crates.
//! It provides:
//! - [`JudgeloopError`]: the unified error type
//! - Domain types ([`WorkItem`], [`CaseClassification`], [`ProcessedRecord`], [`Course`])
//! - Configuration ([`AppConfig`], [`ModelEndpoint`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, ModelEndpoint, RecommenderConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_config,
};
pub use error::{JudgeloopError, Result};
pub use types::{
    AnonymizedText, CaseClassification, CaseStatus, ChatHistory, ChatMessage, ChatRole, Course,
    DEFAULT_ID_WIDTH, Department, JudgeVerdict, ProcessedRecord, ScoredCourse, WorkItem,
    normalize_id, normalize_id_value,
};

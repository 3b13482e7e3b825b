//! Core orchestration for judgeloop.
//!
//! This crate ties the generators and stores together into end-to-end
//! workflows: the judged retry loop, the two-stage case pipeline, the chat
//! query pipeline, and course recommendations.

pub mod chat;
pub mod ingest;
pub mod judge;
pub mod pipeline;
pub mod prompts;
pub mod recommend;

#[cfg(test)]
mod testing;

pub use chat::{ChatAnswer, ChatPipeline, ChatSession, Intent, QueryIntent};
pub use ingest::{LoadedBatch, SkippedItem, load_cases, load_departments};
pub use judge::{JudgedLoop, JudgedTask, RetryOutcome, RetryPolicy, run_judged};
pub use pipeline::{
    BatchOptions, BatchProgress, BatchReport, CasePipeline, ItemStatus, SilentProgress,
};
pub use recommend::{Recommender, import_courses};

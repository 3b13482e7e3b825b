//! Core domain types shared by the case pipeline and the course recommender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of the zero-padded case identifier scheme (`7` → `"007"`).
pub const DEFAULT_ID_WIDTH: usize = 3;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Normalize a raw identifier to its fixed-width, zero-padded dedup key.
///
/// Surrounding whitespace is trimmed; identifiers already at or above
/// `width` characters are returned unchanged.
pub fn normalize_id(raw: &str, width: usize) -> String {
    let trimmed = raw.trim();
    format!("{trimmed:0>width$}")
}

/// Normalize an identifier that may have been stored as a JSON number or string.
///
/// Returns `None` for `null`, empty strings, negative numbers, and non-scalar
/// values. Floats with no fractional part (`1.0`) are treated as integers,
/// which is how numeric columns come back from loosely-typed tabular tools.
pub fn normalize_id_value(value: &serde_json::Value, width: usize) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(normalize_id(s, width)),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Some(normalize_id(&u.to_string(), width));
            }
            let f = n.as_f64()?;
            if f < 0.0 {
                None
            } else if f.fract() == 0.0 {
                Some(normalize_id(&format!("{f:.0}"), width))
            } else {
                Some(normalize_id(&n.to_string(), width))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Case pipeline
// ---------------------------------------------------------------------------

/// One unit of batch input: a normalized case id and the report text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub payload: String,
}

/// Anonymizer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizedText {
    #[serde(alias = "anonymized_text")]
    pub text: String,
}

/// Judge output: did the candidate meet the bar?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    #[serde(alias = "is_correct")]
    pub approved: bool,
}

/// Whether a support case is closed or still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Done,
    Pending,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Pending => "pending",
        }
    }
}

/// Reviewer output for an anonymized case report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseClassification {
    pub status: CaseStatus,
    /// One-sentence summary of actions taken or required.
    pub actions: String,
    /// Any other relevant information.
    pub info: String,
    /// Department id the case is routed to.
    pub department: String,
}

/// A fully processed case, as written to the result sink.
///
/// Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub status: CaseStatus,
    pub actions: String,
    pub info: String,
    pub department: String,
    #[serde(rename = "caseID")]
    pub case_id: String,
}

impl ProcessedRecord {
    /// Flatten a classification and attach the originating case id.
    pub fn new(classification: CaseClassification, case_id: impl Into<String>) -> Self {
        Self {
            status: classification.status,
            actions: classification.actions,
            info: classification.info,
            department: classification.department,
            case_id: case_id.into(),
        }
    }
}

/// Entry of the department catalogue injected into reviewer instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    #[serde(rename = "departmentID")]
    pub id: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Course recommender
// ---------------------------------------------------------------------------

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single turn of a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A stored conversation for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

/// Course catalogue entry (the vector index payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    pub name: String,
    pub level: String,
    pub duration: String,
    pub format: String,
    pub instructor: String,
    pub start_date: String,
    pub description: String,
}

/// A course returned by similarity search, with its cosine score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCourse {
    #[serde(flatten)]
    pub course: Course,
    pub score: f32,
}

//! Failure modes of a single generator or embedder call.

use judgeloop_shared::JudgeloopError;

/// Why a generator call produced no usable value.
///
/// The judged retry loop treats `Generation`, `Timeout` and `Transport` as a
/// failed attempt; `Fatal` ends the loop for the current item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    /// The model answered, but the output is not a valid instance of the schema.
    #[error("invalid model output: {0}")]
    Generation(String),

    /// Connectivity or service-side failure (connection refused, 5xx, 429).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The call did not finish before its deadline.
    #[error("call timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Misconfiguration that retrying cannot fix (auth, unknown model, protocol mismatch).
    #[error("fatal generator error: {0}")]
    Fatal(String),
}

impl GeneratorError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

impl From<GeneratorError> for JudgeloopError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Generation(msg) => JudgeloopError::Generation(msg),
            GeneratorError::Transport(msg) => JudgeloopError::Transport(msg),
            GeneratorError::Timeout { millis } => JudgeloopError::Timeout { millis },
            GeneratorError::Fatal(msg) => JudgeloopError::config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_is_not_retryable() {
        assert!(GeneratorError::Generation("x".into()).is_retryable());
        assert!(GeneratorError::Transport("x".into()).is_retryable());
        assert!(GeneratorError::Timeout { millis: 1 }.is_retryable());
        assert!(!GeneratorError::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn converts_into_workspace_error() {
        let err: JudgeloopError = GeneratorError::Transport("connection refused".into()).into();
        assert!(matches!(err, JudgeloopError::Transport(_)));
        let err: JudgeloopError = GeneratorError::Timeout { millis: 5000 }.into();
        assert_eq!(err.to_string(), "timed out after 5000ms");
    }
}

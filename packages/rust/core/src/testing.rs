//! Scripted generator fakes for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use judgeloop_llm::{GeneratorError, StructuredGenerator};

/// Replays a queue of responses, then repeats `fallback` forever.
pub struct ScriptedGenerator<T> {
    script: Mutex<VecDeque<Result<T, GeneratorError>>>,
    fallback: Result<T, GeneratorError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl<T: Clone + Send> ScriptedGenerator<T> {
    pub fn new(script: Vec<Result<T, GeneratorError>>, fallback: Result<T, GeneratorError>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(value: T) -> Self {
        Self::new(Vec::new(), Ok(value))
    }

    pub fn failing(error: GeneratorError) -> Self {
        Self::new(Vec::new(), Err(error))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> StructuredGenerator<T> for ScriptedGenerator<T> {
    async fn generate(&self, prompt: &str) -> Result<T, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Verdict script helper: `verdicts(&[false, false, true])`.
pub fn verdicts(
    approvals: &[bool],
) -> Vec<Result<judgeloop_shared::JudgeVerdict, GeneratorError>> {
    approvals
        .iter()
        .map(|&approved| Ok(judgeloop_shared::JudgeVerdict { approved }))
        .collect()
}

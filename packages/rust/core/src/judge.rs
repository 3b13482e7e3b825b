//! The judged retry loop: worker proposes, judge approves, bounded attempts.
//!
//! A [`JudgedTask`] supplies the prompts for one stage; [`JudgedLoop`] pairs
//! it with a worker generator, a judge generator, and a [`RetryPolicy`].
//!
//! Outcomes are split in two channels:
//! - `Ok(RetryOutcome)`: the loop ran to completion. `value` is `None` when
//!   every attempt was rejected or produced no usable output.
//! - `Err(..)`: an infrastructure failure for this input only (fatal
//!   generator error, or every attempt failed in transport).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use judgeloop_llm::{GeneratorError, StructuredGenerator};
use judgeloop_shared::{BatchConfig, JudgeVerdict, JudgeloopError, Result};

/// Attempt budget and per-call deadline for a judged loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Deadline for each worker or judge call. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn from_config(batch: &BatchConfig) -> Self {
        Self {
            max_attempts: batch.max_attempts,
            call_timeout: Some(batch.call_timeout()),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Result of a completed loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    /// The approved candidate, or `None` if retries were exhausted.
    pub value: Option<T>,
    /// Worker calls made. Equals `max_attempts` on exhaustion.
    pub attempts_used: u32,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.value.is_some()
    }
}

/// Prompt rendering for one judged stage.
pub trait JudgedTask: Send + Sync {
    type Output: Send + Sync + 'static;

    /// Stage name used in logs.
    fn name(&self) -> &str;

    fn render_worker_prompt(&self, input: &str) -> String;

    fn render_judge_prompt(&self, input: &str, candidate: &Self::Output) -> String;

    /// Short description of a candidate for the attempt log.
    fn summarize(&self, candidate: &Self::Output) -> String;
}

/// A configured stage: task prompts, worker, judge, and policy.
pub struct JudgedLoop<T: JudgedTask> {
    task: T,
    worker: Arc<dyn StructuredGenerator<T::Output>>,
    judge: Arc<dyn StructuredGenerator<JudgeVerdict>>,
    policy: RetryPolicy,
}

impl<T: JudgedTask> JudgedLoop<T> {
    pub fn new(
        task: T,
        worker: Arc<dyn StructuredGenerator<T::Output>>,
        judge: Arc<dyn StructuredGenerator<JudgeVerdict>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            task,
            worker,
            judge,
            policy,
        }
    }

    pub async fn run(&self, input: &str) -> Result<RetryOutcome<T::Output>> {
        run_judged(
            &self.task,
            input,
            self.worker.as_ref(),
            self.judge.as_ref(),
            &self.policy,
        )
        .await
    }
}

/// Drive worker-then-judge attempts until approval or the budget runs out.
#[instrument(skip_all, fields(stage = task.name(), max_attempts = policy.max_attempts))]
pub async fn run_judged<T: JudgedTask>(
    task: &T,
    input: &str,
    worker: &dyn StructuredGenerator<T::Output>,
    judge: &dyn StructuredGenerator<JudgeVerdict>,
    policy: &RetryPolicy,
) -> Result<RetryOutcome<T::Output>> {
    if policy.max_attempts == 0 {
        return Err(JudgeloopError::validation("max_attempts must be at least 1"));
    }
    if input.trim().is_empty() {
        return Err(JudgeloopError::validation("judged loop input is empty"));
    }

    let max_attempts = policy.max_attempts;
    let worker_prompt = task.render_worker_prompt(input);
    let mut transport_failures = 0u32;
    let mut last_transport = String::new();

    for attempt in 1..=max_attempts {
        info!(attempt, max_attempts, "attempt started");

        let candidate = match with_deadline(policy.call_timeout, worker.generate(&worker_prompt)).await {
            Ok(candidate) => candidate,
            Err(e) if !e.is_retryable() => {
                error!(attempt, error = %e, "worker failed fatally");
                return Err(e.into());
            }
            Err(GeneratorError::Transport(msg)) => {
                warn!(attempt, error = %msg, "worker transport failure, counting as failed attempt");
                transport_failures += 1;
                last_transport = msg;
                continue;
            }
            Err(e) => {
                warn!(attempt, error = %e, "worker produced no usable output");
                continue;
            }
        };

        let summary = task.summarize(&candidate);
        let judge_prompt = task.render_judge_prompt(input, &candidate);
        let approved = match with_deadline(policy.call_timeout, judge.generate(&judge_prompt)).await {
            Ok(verdict) => verdict.approved,
            Err(e) if !e.is_retryable() => {
                error!(attempt, error = %e, "judge failed fatally");
                return Err(e.into());
            }
            Err(e) => {
                warn!(attempt, error = %e, "judge produced no verdict, treating as rejection");
                false
            }
        };

        info!(attempt, approved, output = %summary, "attempt judged");
        if approved {
            return Ok(RetryOutcome {
                value: Some(candidate),
                attempts_used: attempt,
            });
        }
        warn!(attempt, max_attempts, "candidate rejected");
    }

    if transport_failures == max_attempts {
        error!(max_attempts, error = %last_transport, "every attempt failed in transport");
        return Err(JudgeloopError::Transport(format!(
            "{max_attempts} consecutive transport failures, last: {last_transport}"
        )));
    }

    error!(max_attempts, "no approved output after all attempts");
    Ok(RetryOutcome {
        value: None,
        attempts_used: max_attempts,
    })
}

/// Await a generator call, mapping deadline expiry to [`GeneratorError::Timeout`].
async fn with_deadline<T>(
    deadline: Option<Duration>,
    call: impl Future<Output = std::result::Result<T, GeneratorError>>,
) -> std::result::Result<T, GeneratorError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(GeneratorError::Timeout {
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })),
        None => call.await,
    }
}

//! Case batch pipeline: anonymize, then classify, then append to the sink.
//!
//! Each stage is a [`JudgedLoop`]. Stage B only ever sees stage A's approved
//! output, and an item that fails either stage is dropped without stopping
//! the batch.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{error, info, instrument, warn};

use judgeloop_llm::{JsonGenerator, LlmClient};
use judgeloop_shared::{
    AnonymizedText, AppConfig, CaseClassification, Department, JudgeVerdict, ProcessedRecord,
    Result, WorkItem,
};
use judgeloop_storage::CsvSink;

use crate::ingest::{self, LoadedBatch, SkippedItem};
use crate::judge::{JudgedLoop, JudgedTask, RetryPolicy};
use crate::prompts;

/// Longest slice of a candidate echoed into attempt logs.
const SUMMARY_CHARS: usize = 160;

// ---------------------------------------------------------------------------
// Stage tasks
// ---------------------------------------------------------------------------

/// Stage A: redact personal data from the raw report.
pub struct AnonymizeTask;

impl JudgedTask for AnonymizeTask {
    type Output = AnonymizedText;

    fn name(&self) -> &str {
        "anonymize"
    }

    fn render_worker_prompt(&self, input: &str) -> String {
        prompts::anonymize_prompt(input)
    }

    fn render_judge_prompt(&self, input: &str, candidate: &AnonymizedText) -> String {
        prompts::anonymize_judge_prompt(input, &candidate.text)
    }

    fn summarize(&self, candidate: &AnonymizedText) -> String {
        truncate_chars(&candidate.text, SUMMARY_CHARS)
    }
}

/// Stage B: classify the anonymized report.
pub struct ReviewTask;

impl JudgedTask for ReviewTask {
    type Output = CaseClassification;

    fn name(&self) -> &str {
        "review"
    }

    fn render_worker_prompt(&self, input: &str) -> String {
        prompts::review_prompt(input)
    }

    fn render_judge_prompt(&self, input: &str, candidate: &CaseClassification) -> String {
        let analysis = serde_json::to_string(candidate).unwrap_or_default();
        prompts::review_judge_prompt(input, &analysis)
    }

    fn summarize(&self, candidate: &CaseClassification) -> String {
        format!(
            "status={} department={} actions={}",
            candidate.status.as_str(),
            candidate.department,
            truncate_chars(&candidate.actions, SUMMARY_CHARS)
        )
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The two judged stages applied to every case.
pub struct CasePipeline {
    anonymize: JudgedLoop<AnonymizeTask>,
    review: JudgedLoop<ReviewTask>,
}

/// What happened to one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded,
    /// A stage exhausted its attempts, or an infrastructure error hit this item.
    Failed,
}

impl CasePipeline {
    pub fn new(anonymize: JudgedLoop<AnonymizeTask>, review: JudgedLoop<ReviewTask>) -> Self {
        Self { anonymize, review }
    }

    /// Build both stages from config, with the department catalogue injected
    /// into the reviewer and reviewer-judge instructions.
    pub fn from_config(config: &AppConfig, departments: &[Department]) -> Result<Self> {
        let policy = RetryPolicy::from_config(&config.batch);
        let catalogue = prompts::render_departments(departments);

        let anonymizer_client = LlmClient::from_endpoint(&config.anonymizer)?;
        let reviewer_client = LlmClient::from_endpoint(&config.reviewer)?;

        let anonymize = JudgedLoop::new(
            AnonymizeTask,
            Arc::new(JsonGenerator::<AnonymizedText>::new(
                anonymizer_client.clone(),
                prompts::anonymizer_role(),
            )),
            Arc::new(JsonGenerator::<JudgeVerdict>::new(
                anonymizer_client,
                prompts::anonymizer_judge_role(),
            )),
            policy,
        );
        let review = JudgedLoop::new(
            ReviewTask,
            Arc::new(JsonGenerator::<CaseClassification>::new(
                reviewer_client.clone(),
                prompts::reviewer_role(&catalogue),
            )),
            Arc::new(JsonGenerator::<JudgeVerdict>::new(
                reviewer_client,
                prompts::reviewer_judge_role(&catalogue),
            )),
            policy,
        );
        Ok(Self::new(anonymize, review))
    }

    /// Run both stages for one item.
    ///
    /// `Ok(None)` means a stage exhausted its attempts; `Err` is an
    /// infrastructure failure for this item only.
    #[instrument(skip_all, fields(case_id = %item.id))]
    pub async fn process_item(&self, item: &WorkItem) -> Result<Option<ProcessedRecord>> {
        let anonymized = self.anonymize.run(&item.payload).await?;
        let Some(anonymized) = anonymized.value else {
            warn!(stage = "anonymize", "stage failed, dropping case");
            return Ok(None);
        };

        let reviewed = self.review.run(&anonymized.text).await?;
        let Some(classification) = reviewed.value else {
            warn!(stage = "review", "stage failed, dropping case");
            return Ok(None);
        };

        let record = ProcessedRecord::new(classification, item.id.clone());
        info!(
            status = record.status.as_str(),
            department = %record.department,
            "case processed"
        );
        Ok(Some(record))
    }

    /// Process selected items and append each success to the sink.
    ///
    /// With `concurrency > 1` up to that many items are in flight, but
    /// results are consumed (and appended) in input order by this one task.
    pub async fn process_items(
        &self,
        items: Vec<WorkItem>,
        sink: &CsvSink,
        concurrency: usize,
        progress: &dyn BatchProgress,
    ) -> (usize, usize) {
        let total = items.len();
        let mut succeeded = 0;
        let mut failed = 0;

        let mut results = futures::stream::iter(items)
            .map(|item| async move {
                let result = self.process_item(&item).await;
                (item, result)
            })
            .buffered(concurrency.max(1));

        let mut done = 0;
        while let Some((item, result)) = results.next().await {
            done += 1;
            let status = match result {
                Ok(Some(record)) => match sink.append(std::slice::from_ref(&record)) {
                    Ok(()) => ItemStatus::Succeeded,
                    Err(e) => {
                        error!(case_id = %item.id, error = %e, "failed to persist case");
                        ItemStatus::Failed
                    }
                },
                Ok(None) => ItemStatus::Failed,
                Err(e) => {
                    error!(case_id = %item.id, error = %e, "case failed");
                    ItemStatus::Failed
                }
            };
            match status {
                ItemStatus::Succeeded => succeeded += 1,
                ItemStatus::Failed => failed += 1,
            }
            progress.item_finished(&item.id, status, done, total);
        }
        (succeeded, failed)
    }

    /// Full run: dedup the loaded batch against the sink, then process.
    #[instrument(skip_all, fields(total = batch.total))]
    pub async fn run_batch(
        &self,
        batch: LoadedBatch,
        processed: &HashSet<String>,
        sink: &CsvSink,
        options: &BatchOptions,
        progress: &dyn BatchProgress,
    ) -> BatchReport {
        let start = Instant::now();
        let valid = batch.items.len();
        let selected = ingest::select_new_items(batch.items, processed, options.id_width);

        let mut report = BatchReport {
            total: batch.total,
            already_processed: valid - selected.len(),
            selected: selected.len(),
            skipped: batch.skipped,
            ..BatchReport::default()
        };

        if selected.is_empty() {
            info!("no new cases to process");
        } else {
            info!(
                selected = report.selected,
                already_processed = report.already_processed,
                concurrency = options.concurrency,
                "processing new cases"
            );
        }
        progress.started(report.selected);

        let (succeeded, failed) = self
            .process_items(selected, sink, options.concurrency, progress)
            .await;
        report.succeeded = succeeded;
        report.failed = failed;
        report.elapsed = start.elapsed();

        progress.finished(&report);
        report
    }

    /// Load the batch file and the processed-id snapshot, then run.
    ///
    /// Failing to read either input is fatal before any case is processed.
    pub async fn run_from_files(
        &self,
        input: &Path,
        sink: &CsvSink,
        options: &BatchOptions,
        progress: &dyn BatchProgress,
    ) -> Result<BatchReport> {
        let batch = ingest::load_cases(input, options.id_width)?;
        let processed = sink.processed_ids(options.id_width)?;
        Ok(self
            .run_batch(batch, &processed, sink, options, progress)
            .await)
    }
}

/// Batch knobs that are not part of the retry policy.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub id_width: usize,
}

impl BatchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.batch.concurrency,
            id_width: config.batch.id_width,
        }
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Records in the input file.
    pub total: usize,
    /// Valid records already present in the sink.
    pub already_processed: usize,
    /// Records sent through the pipeline.
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Malformed records, neither succeeded nor failed.
    pub skipped: Vec<SkippedItem>,
    pub elapsed: Duration,
}

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    fn started(&self, selected: usize);
    fn item_finished(&self, case_id: &str, status: ItemStatus, done: usize, total: usize);
    fn finished(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn started(&self, _selected: usize) {}
    fn item_finished(&self, _case_id: &str, _status: ItemStatus, _done: usize, _total: usize) {}
    fn finished(&self, _report: &BatchReport) {}
}

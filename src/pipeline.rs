//! Run Orchestrator.
//!
//! `created → collecting → deduplicating → judging → persisting → success`,
//! with `failed` reachable from every non-terminal stage. The run row is
//! created before collection starts and finalised exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use chrono::{DateTime, FixedOffset};

use crate::error::PipelineError;
use crate::ingest::retry::{Sleeper, TokioSleeper};
use crate::ingest::types::Collector;
use crate::ingest::{collect_all, dedup_and_count};
use crate::judge::JudgmentProcessor;
use crate::model::{AgentResults, RunStatus};
use crate::run::{Clock, RunId};
use crate::store::{RunUpdate, Store};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Finished runs by terminal status.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix time at which the last run finished."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Created,
    Collecting,
    Deduplicating,
    Judging,
    Persisting,
    Success,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Created => "created",
            RunStage::Collecting => "collecting",
            RunStage::Deduplicating => "deduplicating",
            RunStage::Judging => "judging",
            RunStage::Persisting => "persisting",
            RunStage::Success => "success",
            RunStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller learns about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub execution_id: String,
    pub status: RunStatus,
    pub total_collected: usize,
    pub total_saved: usize,
    pub claude_processed: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<RunStage>,
    pub agent_results: AgentResults,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Counters gathered while stages run; written to the ledger at the end.
struct Progress<'a> {
    run_id: &'a RunId,
    stage: RunStage,
    total_collected: Option<usize>,
    agent_results: AgentResults,
    claude_processed: Option<usize>,
    claude_duration: Option<Duration>,
}

impl<'a> Progress<'a> {
    fn new(run_id: &'a RunId) -> Self {
        Self {
            run_id,
            stage: RunStage::Created,
            total_collected: None,
            agent_results: AgentResults::new(),
            claude_processed: None,
            claude_duration: None,
        }
    }

    fn enter(&mut self, next: RunStage) {
        tracing::info!(
            target: "pipeline",
            execution_id = %self.run_id,
            from = %self.stage,
            to = %next,
            "stage transition"
        );
        self.stage = next;
    }
}

pub struct Pipeline {
    collectors: Vec<Box<dyn Collector>>,
    processor: JudgmentProcessor,
    store: Store,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        collectors: Vec<Box<dyn Collector>>,
        processor: JudgmentProcessor,
        store: Store,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collectors,
            processor,
            store,
            sleeper: Arc::new(TokioSleeper),
            clock,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Start a run now, with an id derived from the clock.
    pub async fn run_now(&self) -> RunSummary {
        let started_at = self.clock.now();
        self.execute(RunId::for_start(&started_at), started_at).await
    }

    /// Execute one run to a terminal state. Never fails: errors become a
    /// `failed` summary and are recorded in the ledger.
    pub async fn execute(&self, run_id: RunId, started_at: DateTime<FixedOffset>) -> RunSummary {
        ensure_metrics_described();
        tracing::info!(target: "pipeline", execution_id = %run_id, "run started");

        let mut progress = Progress::new(&run_id);

        if let Err(e) = self.store.create_run(&run_id, started_at).await {
            // No ledger row exists, so there is nothing to finalise.
            let err = PipelineError::from(e);
            tracing::error!(target: "pipeline", execution_id = %run_id, error = %err, "could not create run record");
            return self.finish_without_ledger(&progress, err);
        }

        let outcome = self.run_stages(&mut progress).await;
        self.finalise(progress, outcome).await
    }

    async fn run_stages(&self, progress: &mut Progress<'_>) -> Result<usize, PipelineError> {
        progress.enter(RunStage::Collecting);
        let collection = match collect_all(&self.collectors, self.sleeper.as_ref()).await {
            Ok(c) => c,
            Err(failure) => {
                progress.agent_results = failure.results;
                return Err(PipelineError::SourceExhausted {
                    collector: failure.collector,
                    attempts: failure.attempts,
                    message: format!("{:#}", failure.error),
                });
            }
        };
        progress.agent_results = collection.results;
        progress.total_collected = Some(collection.items.len());

        progress.enter(RunStage::Deduplicating);
        let (unique, removed) = dedup_and_count(collection.items);
        tracing::info!(
            target: "pipeline",
            execution_id = %progress.run_id,
            unique = unique.len(),
            removed,
            "deduplicated"
        );

        progress.enter(RunStage::Judging);
        let judged = self.processor.judge_items(unique).await?;
        progress.claude_processed = Some(judged.items.len());
        progress.claude_duration = Some(judged.duration);

        progress.enter(RunStage::Persisting);
        let saved = self
            .store
            .save_items(&judged.items, progress.run_id, self.clock.now())
            .await?;
        Ok(saved)
    }

    async fn finalise(
        &self,
        mut progress: Progress<'_>,
        outcome: Result<usize, PipelineError>,
    ) -> RunSummary {
        let failed_stage = progress.stage;
        let (status, saved, error) = match outcome {
            Ok(saved) => (RunStatus::Success, saved, None),
            Err(e) => (RunStatus::Failed, 0, Some(e.to_string())),
        };

        let update = RunUpdate {
            status,
            total_collected: progress.total_collected,
            total_saved: saved,
            error_message: error.clone(),
            agent_results: Some(progress.agent_results.clone()),
            claude_processed: progress.claude_processed,
            claude_duration_sec: progress.claude_duration.map(|d| d.as_secs_f64()),
        };

        let (status, saved, error) = match self
            .store
            .update_run(progress.run_id, self.clock.now(), &update)
            .await
        {
            Ok(true) => (status, saved, error),
            Ok(false) => {
                let err = PipelineError::NotFinalised {
                    execution_id: progress.run_id.to_string(),
                };
                tracing::error!(target: "pipeline", execution_id = %progress.run_id, error = %err, "could not finalise run record");
                (RunStatus::Failed, saved, Some(err.to_string()))
            }
            Err(e) => {
                tracing::error!(target: "pipeline", execution_id = %progress.run_id, error = %e, "could not finalise run record");
                (
                    RunStatus::Failed,
                    saved,
                    Some(PipelineError::from(e).to_string()),
                )
            }
        };

        progress.enter(match status {
            RunStatus::Success => RunStage::Success,
            _ => RunStage::Failed,
        });

        self.summarise(&progress, status, saved, error, failed_stage)
    }

    fn finish_without_ledger(&self, progress: &Progress<'_>, err: PipelineError) -> RunSummary {
        self.summarise(
            progress,
            RunStatus::Failed,
            0,
            Some(err.to_string()),
            RunStage::Created,
        )
    }

    fn summarise(
        &self,
        progress: &Progress<'_>,
        status: RunStatus,
        saved: usize,
        error: Option<String>,
        stage_at_end: RunStage,
    ) -> RunSummary {
        counter!("pipeline_runs_total", "status" => status.as_str()).increment(1);
        gauge!("pipeline_last_run_ts").set(self.clock.now().timestamp() as f64);

        let total_collected = progress.total_collected.unwrap_or(0);
        let message = match &error {
            None => format!("saved {saved} new items ({total_collected} collected)"),
            Some(e) => format!("run failed: {e}"),
        };

        match status {
            RunStatus::Success => tracing::info!(
                target: "pipeline",
                execution_id = %progress.run_id,
                total_collected,
                total_saved = saved,
                "run succeeded"
            ),
            _ => tracing::error!(
                target: "pipeline",
                execution_id = %progress.run_id,
                stage = %stage_at_end,
                error = error.as_deref().unwrap_or_default(),
                "run failed"
            ),
        }

        RunSummary {
            execution_id: progress.run_id.to_string(),
            status,
            total_collected,
            total_saved: saved,
            claude_processed: progress.claude_processed.unwrap_or(0),
            message,
            failed_stage: error.as_ref().map(|_| stage_at_end),
            error,
            agent_results: progress.agent_results.clone(),
        }
    }
}

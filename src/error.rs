//! Error taxonomy for the pipeline stages.
//!
//! Transient collector failures and per-item problems are handled where they
//! occur; only the fatal kinds below reach the run orchestrator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot decode column {column}: {message}")]
    Decode { column: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum JudgmentError {
    /// Transport or provider failure while calling the judge.
    #[error("judge call failed: {0:#}")]
    Call(anyhow::Error),
    /// The judge answered, but not with a JSON object or array.
    #[error("unparsable judge response: {message}")]
    Parse { message: String, excerpt: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{collector} collector failed after {attempts} attempts: {message}")]
    SourceExhausted {
        collector: String,
        attempts: u32,
        message: String,
    },
    #[error(transparent)]
    Judgment(#[from] JudgmentError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    /// The final ledger write matched no `running` row.
    #[error("run {execution_id} was not finalised: no running ledger row")]
    NotFinalised { execution_id: String },
}

// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod judge;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod run;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;

use crate::config::{AiConfig, Settings};
use crate::ingest::config::SourcesConfig;
use crate::ingest::providers::build_collectors;
use crate::judge::client::build_judge_client;
use crate::judge::prompt::{load_judge_prompt, prompts_dir};
use crate::judge::{FilterPolicy, JudgmentProcessor};
use crate::pipeline::Pipeline;
use crate::run::SystemClock;
use crate::store::{database_path, Store};

pub use crate::api::router;

/// Everything a binary needs, wired from config files and environment.
pub struct Runtime {
    pub settings: Settings,
    pub store: Store,
    pub pipeline: Arc<Pipeline>,
}

/// Load settings, sources, judge config and prompt; open and migrate the store.
pub async fn bootstrap() -> anyhow::Result<Runtime> {
    let settings = Settings::load_default().context("loading settings")?;
    let clock = Arc::new(SystemClock::new(settings.offset()?));

    let sources = SourcesConfig::load_default().context("loading sources")?;
    let collectors = build_collectors(&sources)?;

    let ai = AiConfig::load_default().context("loading ai config")?;
    let client = build_judge_client(&ai)?;
    let prompt = load_judge_prompt(&prompts_dir(), &settings)?;
    let processor = JudgmentProcessor::new(client, prompt, FilterPolicy::from(&settings.filtering));

    let path = database_path();
    let store = Store::open(&path)
        .await
        .with_context(|| format!("opening database {}", path.display()))?;
    store.migrate().await.context("creating schema")?;

    let pipeline = Arc::new(Pipeline::new(collectors, processor, store.clone(), clock));
    tracing::info!(subject = %settings.subject, db = %path.display(), "runtime ready");

    Ok(Runtime {
        settings,
        store,
        pipeline,
    })
}

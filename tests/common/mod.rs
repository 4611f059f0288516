// tests/common/mod.rs
// Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde_json::{json, Value};

use mention_tracker::ingest::retry::{RetryPolicy, Sleeper};
use mention_tracker::ingest::types::Collector;
use mention_tracker::judge::client::CannedJudgeClient;
use mention_tracker::judge::{FilterPolicy, JudgmentProcessor};
use mention_tracker::model::{RawItem, Source};
use mention_tracker::pipeline::Pipeline;
use mention_tracker::run::FixedClock;
use mention_tracker::store::Store;

pub fn t0() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2025-03-04T12:00:00+09:00").unwrap()
}

pub fn item(source: Source, url: &str, title: &str) -> RawItem {
    RawItem {
        source,
        source_detail: format!("test:{source}"),
        title: Some(title.to_string()),
        content: Some(format!("{title} body")),
        url: url.to_string(),
        published_at: "2025-03-04T09:00:00+09:00".to_string(),
        metrics: None,
        author: None,
        author_account: None,
    }
}

pub fn judgment(url: &str, relevance: u8, importance: u8, level: &str) -> Value {
    json!({
        "url": url,
        "relevance_score": relevance,
        "importance_score": importance,
        "importance_level": level,
        "category": "music",
        "summary": format!("summary of {url}"),
        "claude_reason": "test",
    })
}

/// Wraps judgments the way the model usually answers: in a ```json fence.
pub fn fenced(judgments: &[Value]) -> String {
    format!(
        "Here are the judgments:\n```json\n{}\n```",
        serde_json::to_string_pretty(judgments).unwrap()
    )
}

/// Fails its first `fail_first` calls, then returns `items`.
pub struct ScriptedCollector {
    name: String,
    items: Vec<RawItem>,
    fail_first: u32,
    calls: Arc<AtomicU32>,
    policy: RetryPolicy,
}

impl ScriptedCollector {
    pub fn ok(name: &str, items: Vec<RawItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
            fail_first: 0,
            calls: Arc::new(AtomicU32::new(0)),
            policy: RetryPolicy::new(2, Duration::from_secs(5)),
        }
    }

    pub fn always_failing(name: &str) -> Self {
        Self {
            fail_first: u32::MAX,
            ..Self::ok(name, Vec::new())
        }
    }

    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Handle to the call counter, usable after the collector is boxed.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl Collector for ScriptedCollector {
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            anyhow::bail!("{} unreachable (call {n})", self.name);
        }
        Ok(self.items.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.0.lock().unwrap().push(delay);
    }
}

pub async fn memory_store() -> Store {
    let store = Store::in_memory().await.expect("in-memory sqlite");
    store.migrate().await.expect("schema");
    store
}

pub fn policy(min_relevance: u8) -> FilterPolicy {
    FilterPolicy {
        min_relevance_score: min_relevance,
        min_importance_score: 0,
        excluded_keywords: vec!["giveaway".to_string()],
    }
}

/// Pipeline over `collectors` with a canned judge and a recording sleeper.
pub fn pipeline(
    collectors: Vec<Box<dyn Collector>>,
    judge: Arc<CannedJudgeClient>,
    store: Store,
    sleeper: Arc<RecordingSleeper>,
) -> Pipeline {
    let processor = JudgmentProcessor::new(judge, "system prompt", policy(30));
    Pipeline::new(collectors, processor, store, Arc::new(FixedClock(t0()))).with_sleeper(sleeper)
}

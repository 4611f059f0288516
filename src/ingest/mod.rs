// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod retry;
pub mod types;

use std::collections::HashSet;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::ingest::retry::{collect_with_retry, RetryOutcome, Sleeper};
use crate::ingest::types::Collector;
use crate::model::{AgentResult, AgentResults, RawItem, RunStatus};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collector_attempts_total", "Collector attempts, retries included.");
        describe_counter!(
            "collector_failures_total",
            "Collectors that exhausted their retries."
        );
        describe_counter!(
            "ingest_items_collected_total",
            "Items returned by successful collectors."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Items removed by URL deduplication (duplicates and empty URLs)."
        );
    });
}

/// Normalize scraped text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. ideographic space)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{3000}]+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 2000 chars
    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }

    out
}

/// Keep the first item per URL, in input order. Items with an empty URL are dropped.
pub fn dedup_by_url(items: Vec<RawItem>) -> Vec<RawItem> {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len());
    for it in items {
        if it.url.is_empty() || !seen.insert(it.url.clone()) {
            continue;
        }
        keep.push(it);
    }
    keep
}

/// Every collector succeeded.
#[derive(Debug)]
pub struct Collection {
    /// Concatenated in registration order.
    pub items: Vec<RawItem>,
    pub results: AgentResults,
}

/// A collector exhausted its retries; earlier collectors' items are discarded.
#[derive(Debug)]
pub struct CollectionFailure {
    pub collector: String,
    pub attempts: u32,
    pub error: anyhow::Error,
    /// Results gathered up to and including the failing collector.
    pub results: AgentResults,
}

/// Run collectors one after another, stopping at the first exhausted one.
pub async fn collect_all(
    collectors: &[Box<dyn Collector>],
    sleeper: &dyn Sleeper,
) -> Result<Collection, CollectionFailure> {
    ensure_metrics_described();

    let mut items = Vec::new();
    let mut results = AgentResults::new();

    for c in collectors {
        match collect_with_retry(c.as_ref(), sleeper).await {
            RetryOutcome::Success { data, attempts } => {
                tracing::info!(
                    target: "ingest",
                    collector = c.name(),
                    attempts,
                    count = data.len(),
                    "collector done"
                );
                counter!("ingest_items_collected_total").increment(data.len() as u64);
                results.insert(
                    c.name().to_string(),
                    AgentResult {
                        status: RunStatus::Success,
                        attempts,
                        count: data.len(),
                    },
                );
                items.extend(data);
            }
            RetryOutcome::Failed { error, attempts } => {
                tracing::error!(
                    target: "ingest",
                    collector = c.name(),
                    attempts,
                    error = %format!("{error:#}"),
                    "collector exhausted retries; aborting collection"
                );
                results.insert(
                    c.name().to_string(),
                    AgentResult {
                        status: RunStatus::Failed,
                        attempts,
                        count: 0,
                    },
                );
                return Err(CollectionFailure {
                    collector: c.name().to_string(),
                    attempts,
                    error,
                    results,
                });
            }
        }
    }

    Ok(Collection { items, results })
}

/// `dedup_by_url` plus a metrics update; returns the number of items removed.
pub fn dedup_and_count(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    ensure_metrics_described();
    let before = items.len();
    let unique = dedup_by_url(items);
    let removed = before - unique.len();
    counter!("ingest_dedup_total").increment(removed as u64);
    (unique, removed)
}

//! Judgment Processor.
//!
//! One run submits every unique item in a single request, parses the judge's
//! text back into per-URL [`Judgment`]s, merges them onto the items and applies
//! the filter policy. Items the judge did not answer for are dropped, never
//! zero-filled.

pub mod client;
pub mod prompt;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::config::settings::Filtering;
use crate::error::JudgmentError;
use crate::model::{JudgedItem, Judgment, RawItem};

use self::client::{DynJudgeClient, JudgeRequest};

const EXCERPT_CHARS: usize = 200;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("judge_items_submitted_total", "Items sent to the judge.");
        describe_counter!(
            "judge_items_missing_total",
            "Submitted items the judge returned no usable judgment for."
        );
        describe_counter!(
            "judge_items_filtered_total",
            "Judged items rejected by the filter policy."
        );
        describe_histogram!("judge_call_ms", "Wall-clock time of the judge call (ms).");
    });
}

/// Strip a surrounding ```` ```json ```` (or bare ```` ``` ````) fence if present.
pub fn extract_json_text(text: &str) -> &str {
    static RE_FENCE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE_FENCE
        .get_or_init(|| regex::Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap());
    match re.captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => text.trim(),
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse judge output into `url → Judgment`.
///
/// Accepts a single object or an array, optionally fenced. Elements without a
/// `url` are ignored; elements with bad fields are discarded with a warning.
/// Later elements win over earlier ones for the same URL.
pub fn parse_judgments(text: &str) -> Result<HashMap<String, Judgment>, JudgmentError> {
    let body = extract_json_text(text);
    let value: Value = serde_json::from_str(body).map_err(|e| JudgmentError::Parse {
        message: e.to_string(),
        excerpt: excerpt(text),
    })?;

    let elements = match value {
        Value::Array(v) => v,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(JudgmentError::Parse {
                message: format!("expected a JSON object or array, got {}", json_kind(&other)),
                excerpt: excerpt(text),
            })
        }
    };

    let mut out = HashMap::with_capacity(elements.len());
    for el in elements {
        let url = match el.get("url").and_then(Value::as_str) {
            Some(u) if !u.trim().is_empty() => u.to_string(),
            _ => {
                tracing::debug!(target: "judge", "judgment without url ignored");
                continue;
            }
        };
        match serde_json::from_value::<Judgment>(el) {
            Ok(j) if j.relevance_score <= 100 && j.importance_score <= 100 => {
                out.insert(url, j);
            }
            Ok(j) => tracing::warn!(
                target: "judge",
                %url,
                relevance = j.relevance_score,
                importance = j.importance_score,
                "judgment scores out of range; discarded"
            ),
            Err(e) => tracing::warn!(target: "judge", %url, error = %e, "malformed judgment; discarded"),
        }
    }
    Ok(out)
}

/// Attach judgments to items by URL. Returns the merged items and how many
/// items had no judgment. Judgments for URLs not in `items` are ignored.
pub fn merge_judgments(
    items: Vec<RawItem>,
    mut judgments: HashMap<String, Judgment>,
) -> (Vec<JudgedItem>, usize) {
    let mut merged = Vec::with_capacity(items.len());
    let mut missing = 0;
    for item in items {
        match judgments.remove(&item.url) {
            Some(j) => merged.push(JudgedItem::new(item, j)),
            None => {
                missing += 1;
                tracing::warn!(target: "judge", url = %item.url, source = %item.source, "no judgment for item; dropped");
            }
        }
    }
    if !judgments.is_empty() {
        tracing::debug!(
            target: "judge",
            unknown = judgments.len(),
            "judgments for unsubmitted urls ignored"
        );
    }
    (merged, missing)
}

/// Policy thresholds applied after merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    pub min_relevance_score: u8,
    pub min_importance_score: u8,
    pub excluded_keywords: Vec<String>,
}

impl From<&Filtering> for FilterPolicy {
    fn from(f: &Filtering) -> Self {
        Self {
            min_relevance_score: f.min_relevance_score,
            min_importance_score: f.min_importance_score,
            excluded_keywords: f.excluded_keywords.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Keep,
    LowRelevance { score: u8, min: u8 },
    LowImportance { score: u8, min: u8 },
    ExcludedKeyword(String),
}

impl FilterVerdict {
    pub fn is_keep(&self) -> bool {
        matches!(self, FilterVerdict::Keep)
    }
}

impl fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterVerdict::Keep => f.write_str("keep"),
            FilterVerdict::LowRelevance { score, min } => {
                write!(f, "relevance {score} < {min}")
            }
            FilterVerdict::LowImportance { score, min } => {
                write!(f, "importance {score} < {min}")
            }
            FilterVerdict::ExcludedKeyword(k) => write!(f, "excluded keyword '{k}'"),
        }
    }
}

impl FilterPolicy {
    /// Relevance, then importance, then excluded keywords; first failure wins.
    pub fn check(&self, item: &JudgedItem) -> FilterVerdict {
        let j = &item.judgment;
        if j.relevance_score < self.min_relevance_score {
            return FilterVerdict::LowRelevance {
                score: j.relevance_score,
                min: self.min_relevance_score,
            };
        }
        if j.importance_score < self.min_importance_score {
            return FilterVerdict::LowImportance {
                score: j.importance_score,
                min: self.min_importance_score,
            };
        }
        let text = item.item.full_text();
        if let Some(k) = self.excluded_keywords.iter().find(|k| text.contains(k.as_str())) {
            return FilterVerdict::ExcludedKeyword(k.clone());
        }
        FilterVerdict::Keep
    }

    pub fn apply(&self, items: Vec<JudgedItem>) -> Vec<JudgedItem> {
        items
            .into_iter()
            .filter(|it| {
                let verdict = self.check(it);
                if !verdict.is_keep() {
                    tracing::info!(target: "judge", url = %it.url(), reason = %verdict, "item filtered out");
                }
                verdict.is_keep()
            })
            .collect()
    }
}

/// Result of one judgment stage.
#[derive(Debug)]
pub struct JudgmentOutcome {
    /// Merged and filtered, in submission order.
    pub items: Vec<JudgedItem>,
    pub submitted: usize,
    pub missing: usize,
    pub filtered_out: usize,
    /// Wall-clock time of the external call; zero when no call was made.
    pub duration: Duration,
}

pub struct JudgmentProcessor {
    client: DynJudgeClient,
    system_prompt: String,
    policy: FilterPolicy,
}

impl JudgmentProcessor {
    pub fn new(client: DynJudgeClient, system_prompt: impl Into<String>, policy: FilterPolicy) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
            policy,
        }
    }

    /// Judge the whole batch in one call, then merge and filter.
    pub async fn judge_items(&self, items: Vec<RawItem>) -> Result<JudgmentOutcome, JudgmentError> {
        ensure_metrics_described();

        if items.is_empty() {
            return Ok(JudgmentOutcome {
                items: Vec::new(),
                submitted: 0,
                missing: 0,
                filtered_out: 0,
                duration: Duration::ZERO,
            });
        }

        let submitted = items.len();
        counter!("judge_items_submitted_total").increment(submitted as u64);
        tracing::info!(
            target: "judge",
            provider = self.client.provider_name(),
            items = submitted,
            "submitting batch for judgment"
        );

        let request = JudgeRequest {
            system_prompt: &self.system_prompt,
            items: &items,
        };
        let started = Instant::now();
        let response = self.client.judge(&request).await;
        let duration = started.elapsed();
        histogram!("judge_call_ms").record(duration.as_secs_f64() * 1000.0);

        let text = response.map_err(JudgmentError::Call)?;
        let judgments = match parse_judgments(&text) {
            Ok(j) => j,
            Err(e) => {
                if let JudgmentError::Parse { excerpt, .. } = &e {
                    tracing::error!(target: "judge", error = %e, %excerpt, "judge response unparsable");
                }
                return Err(e);
            }
        };

        let (merged, missing) = merge_judgments(items, judgments);
        counter!("judge_items_missing_total").increment(missing as u64);

        let judged = merged.len();
        let kept = self.policy.apply(merged);
        let filtered_out = judged - kept.len();
        counter!("judge_items_filtered_total").increment(filtered_out as u64);

        tracing::info!(
            target: "judge",
            submitted,
            missing,
            filtered_out,
            kept = kept.len(),
            duration_ms = duration.as_millis() as u64,
            "judgment done"
        );

        Ok(JudgmentOutcome {
            items: kept,
            submitted,
            missing,
            filtered_out,
            duration,
        })
    }
}

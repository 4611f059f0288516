//! Record shapes that flow through the pipeline.
//!
//! An item moves through three increasingly specific shapes:
//! [`RawItem`] (as collected) → [`JudgedItem`] (judgment merged) → [`PersistedItem`]
//! (row read back from the store). A `JudgedItem` can only be built from a
//! complete [`Judgment`], so "not yet judged" and "judged" never share a type.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// Origin of a collected item. Closed set; one collector per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Twitter,
    YahooNews,
    Modelpress,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Twitter => "twitter",
            Source::YahooNews => "yahoo_news",
            Source::Modelpress => "modelpress",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twitter" => Ok(Source::Twitter),
            "yahoo_news" => Ok(Source::YahooNews),
            "modelpress" => Ok(Source::Modelpress),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Item as it leaves a collector.
///
/// `published_at` keeps the collector's ISO-8601 text; it is normalised to a
/// timestamp by the store, which substitutes "now" when it cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: Source,
    pub source_detail: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Cross-source identity key. Empty means "no identity"; such items are dropped by dedup.
    pub url: String,
    pub published_at: String,
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_account: Option<String>,
}

impl RawItem {
    /// `"{title} {content}"` with missing parts as empty strings.
    pub fn full_text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.content.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    High,
    Medium,
    Low,
}

impl ImportanceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceLevel::High => "high",
            ImportanceLevel::Medium => "medium",
            ImportanceLevel::Low => "low",
        }
    }
}

impl FromStr for ImportanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(ImportanceLevel::High),
            "medium" => Ok(ImportanceLevel::Medium),
            "low" => Ok(ImportanceLevel::Low),
            other => Err(format!("unknown importance level '{other}'")),
        }
    }
}

// Judges are not consistent about case ("High", "HIGH"); accept any.
impl<'de> Deserialize<'de> for ImportanceLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse().map_err(serde::de::Error::custom)
    }
}

/// The six fields the judge returns for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub relevance_score: u8,
    pub importance_score: u8,
    pub importance_level: ImportanceLevel,
    /// Drawn from the configured categories, but not validated against them.
    pub category: String,
    pub summary: String,
    pub claude_reason: String,
}

/// A raw item with its judgment merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JudgedItem {
    #[serde(flatten)]
    pub item: RawItem,
    #[serde(flatten)]
    pub judgment: Judgment,
}

impl JudgedItem {
    pub fn new(item: RawItem, judgment: Judgment) -> Self {
        Self { item, judgment }
    }

    pub fn url(&self) -> &str {
        &self.item.url
    }
}

/// Row of the `items` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedItem {
    pub id: i64,
    pub source: Source,
    pub source_detail: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub published_at: DateTime<FixedOffset>,
    pub relevance_score: Option<i64>,
    pub importance_score: Option<i64>,
    pub importance_level: Option<ImportanceLevel>,
    pub category: Option<String>,
    pub claude_reason: Option<String>,
    pub metrics: Option<serde_json::Value>,
    pub collected_at: DateTime<FixedOffset>,
    pub execution_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Per-collector snapshot kept in the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: RunStatus,
    pub attempts: u32,
    pub count: usize,
}

/// Collector name → outcome, for the `agent_results` ledger column.
pub type AgentResults = BTreeMap<String, AgentResult>;

/// Row of the `executions` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<FixedOffset>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub status: RunStatus,
    pub total_collected: i64,
    pub total_saved: i64,
    pub error_message: Option<String>,
    pub agent_results: Option<serde_json::Value>,
    pub claude_processed: Option<i64>,
    pub claude_duration_sec: Option<f64>,
}

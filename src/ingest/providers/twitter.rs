// src/ingest/providers/twitter.rs
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::config::{EngagementThreshold, TwitterCfg};
use crate::ingest::dedup_by_url;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::Collector;
use crate::model::{RawItem, Source};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One JSONL record as emitted by `snscrape --jsonl twitter-search`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tweet {
    url: Option<String>,
    date: Option<String>,
    content: Option<String>,
    raw_content: Option<String>,
    #[serde(default)]
    like_count: Option<i64>,
    #[serde(default)]
    retweet_count: Option<i64>,
    #[serde(default)]
    view_count: Option<i64>,
    #[serde(default)]
    user: Option<TweetUser>,
}

#[derive(Debug, Deserialize)]
struct TweetUser {
    displayname: Option<String>,
    username: Option<String>,
}

enum Mode {
    /// hashtag → JSONL body
    Fixture(BTreeMap<String, String>),
    Command { program: String, max_results: u32 },
}

/// Searches X/Twitter by hashtag through an external scraper command.
pub struct TwitterCollector {
    hashtags: Vec<String>,
    threshold: EngagementThreshold,
    mode: Mode,
    policy: RetryPolicy,
}

impl TwitterCollector {
    pub fn from_config(cfg: &TwitterCfg) -> Self {
        Self {
            hashtags: cfg.hashtags.clone(),
            threshold: cfg.engagement_threshold,
            mode: Mode::Command {
                program: cfg.command.clone(),
                max_results: cfg.max_results,
            },
            policy: cfg.retry.policy(),
        }
    }

    /// Serve canned JSONL per hashtag. A hashtag without an entry fails its search.
    pub fn from_fixtures(
        fixtures: BTreeMap<String, String>,
        threshold: EngagementThreshold,
    ) -> Self {
        Self {
            hashtags: fixtures.keys().cloned().collect(),
            threshold,
            mode: Mode::Fixture(fixtures),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_hashtags(mut self, hashtags: Vec<String>) -> Self {
        self.hashtags = hashtags;
        self
    }

    async fn search_jsonl(&self, hashtag: &str) -> Result<String> {
        match &self.mode {
            Mode::Fixture(map) => map
                .get(hashtag)
                .cloned()
                .ok_or_else(|| anyhow!("no fixture for hashtag '{hashtag}'")),
            Mode::Command {
                program,
                max_results,
            } => {
                let query = hashtag.trim_start_matches('#');
                let mut cmd = tokio::process::Command::new(program);
                cmd.arg("--jsonl")
                    .arg("--max-results")
                    .arg(max_results.to_string())
                    .arg("twitter-search")
                    .arg(query)
                    .kill_on_drop(true);
                let out = tokio::time::timeout(SEARCH_TIMEOUT, cmd.output())
                    .await
                    .map_err(|_| anyhow!("search for '{hashtag}' timed out"))?
                    .with_context(|| format!("spawning {program}"))?;
                if !out.status.success() {
                    bail!(
                        "{program} exited with {}: {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    );
                }
                String::from_utf8(out.stdout).context("scraper output is not utf-8")
            }
        }
    }

    fn parse_jsonl(&self, hashtag: &str, body: &str) -> Vec<RawItem> {
        let mut out = Vec::new();
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let tweet: Tweet = match serde_json::from_str(line) {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(target: "ingest", error = %e, "skipping malformed tweet line");
                    continue;
                }
            };
            let item = to_raw_item(tweet, hashtag);
            if meets_engagement_threshold(&item, &self.threshold) {
                out.push(item);
            }
        }
        out
    }
}

fn to_raw_item(t: Tweet, hashtag: &str) -> RawItem {
    let mut metrics = BTreeMap::new();
    metrics.insert("likes".to_string(), t.like_count.unwrap_or(0));
    metrics.insert("retweets".to_string(), t.retweet_count.unwrap_or(0));
    metrics.insert("views".to_string(), t.view_count.unwrap_or(0));

    let (author, author_account) = match t.user {
        Some(u) => (u.displayname, u.username),
        None => (None, None),
    };

    RawItem {
        source: Source::Twitter,
        source_detail: format!("hashtag:{hashtag}"),
        title: None,
        content: t.raw_content.or(t.content),
        url: t.url.unwrap_or_default(),
        published_at: t.date.unwrap_or_default(),
        metrics: Some(metrics),
        author,
        author_account,
    }
}

/// likes ≥ threshold OR views ≥ threshold.
pub fn meets_engagement_threshold(item: &RawItem, th: &EngagementThreshold) -> bool {
    let Some(m) = &item.metrics else {
        return false;
    };
    let likes = m.get("likes").copied().unwrap_or(0);
    let views = m.get("views").copied().unwrap_or(0);
    likes >= th.likes || views >= th.views
}

#[async_trait]
impl Collector for TwitterCollector {
    async fn collect(&self) -> Result<Vec<RawItem>> {
        let mut all = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for tag in &self.hashtags {
            match self.search_jsonl(tag).await {
                Ok(body) => all.extend(self.parse_jsonl(tag, &body)),
                Err(e) => {
                    tracing::warn!(target: "ingest", hashtag = %tag, error = %format!("{e:#}"), "hashtag search failed");
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if failures > 0 && failures == self.hashtags.len() {
            let e = last_err.unwrap_or_else(|| anyhow!("no hashtag search succeeded"));
            return Err(e.context("all hashtag searches failed"));
        }

        Ok(dedup_by_url(all))
    }

    fn name(&self) -> &str {
        Source::Twitter.as_str()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

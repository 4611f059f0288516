// src/ingest/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::ingest::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};

pub const ENV_SOURCES_PATH: &str = "SOURCES_PATH";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";

fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_interval_secs() -> u64 {
    5
}

/// Retry knobs shared by every source section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryCfg {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl RetryCfg {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_interval_secs),
        )
    }
}

fn default_min_likes() -> i64 {
    10_000
}
fn default_min_views() -> i64 {
    100_000
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngagementThreshold {
    #[serde(default = "default_min_likes")]
    pub likes: i64,
    #[serde(default = "default_min_views")]
    pub views: i64,
}

impl Default for EngagementThreshold {
    fn default() -> Self {
        Self {
            likes: default_min_likes(),
            views: default_min_views(),
        }
    }
}

fn default_max_results() -> u32 {
    20
}
fn default_command() -> String {
    "snscrape".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub engagement_threshold: EngagementThreshold,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(flatten)]
    pub retry: RetryCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsFeedCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub feed_url: String,
    #[serde(default)]
    pub search_keyword: String,
    #[serde(flatten)]
    pub retry: RetryCfg,
}

/// Contents of `config/sources.json`. A missing section disables that collector.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub twitter: Option<TwitterCfg>,
    #[serde(default)]
    pub yahoo_news: Option<NewsFeedCfg>,
    #[serde(default)]
    pub modelpress: Option<NewsFeedCfg>,
}

impl SourcesConfig {
    /// Load from an explicit path. Supports TOML or JSON formats (by extension).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sources config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg: SourcesConfig = if ext == "toml" {
            toml::from_str(&content).context("parsing sources toml")?
        } else {
            serde_json::from_str(&content).context("parsing sources json")?
        };
        if let Some(tw) = cfg.twitter.as_mut() {
            tw.hashtags = clean_list(std::mem::take(&mut tw.hashtags));
        }
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $SOURCES_PATH
    /// 2) config/sources.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("SOURCES_PATH points to non-existent path"));
        }
        Self::load_from(Path::new(DEFAULT_SOURCES_PATH))
    }
}

/// Trim, drop empties, de-duplicate (keeps first occurrence order).
pub fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn clean_list_trims_and_dedups() {
        let out = clean_list(vec![" #a ".into(), "".into(), "#b".into(), "#a".into()]);
        assert_eq!(out, vec!["#a".to_string(), "#b".to_string()]);
    }

    #[test]
    fn json_and_toml_formats_parse() {
        let dir = tempfile::tempdir().unwrap();

        let p_json = dir.path().join("sources.json");
        fs::write(
            &p_json,
            r##"{
                "twitter": { "hashtags": [" #x ", "#x"], "max_retries": 4 },
                "yahoo_news": { "feed_url": "https://news.test/rss", "search_keyword": "kw" }
            }"##,
        )
        .unwrap();
        let cfg = SourcesConfig::load_from(&p_json).unwrap();
        let tw = cfg.twitter.unwrap();
        assert_eq!(tw.hashtags, vec!["#x".to_string()]);
        assert_eq!(tw.retry.policy().max_retries, 4);
        assert_eq!(tw.retry.retry_interval_secs, 5);
        assert_eq!(tw.engagement_threshold.likes, 10_000);
        assert!(cfg.modelpress.is_none());

        let p_toml = dir.path().join("sources.toml");
        fs::write(
            &p_toml,
            r#"
[modelpress]
feed_url = "https://mp.test/rss"
retry_interval_secs = 1
"#,
        )
        .unwrap();
        let cfg = SourcesConfig::load_from(&p_toml).unwrap();
        let mp = cfg.modelpress.unwrap();
        assert!(mp.enabled);
        assert_eq!(mp.retry.policy().delay, Duration::from_secs(1));
    }

    #[serial_test::serial]
    #[test]
    fn env_path_must_exist() {
        env::set_var(ENV_SOURCES_PATH, "/definitely/not/here.json");
        assert!(SourcesConfig::load_default().is_err());
        env::remove_var(ENV_SOURCES_PATH);
    }
}

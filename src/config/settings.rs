// src/config/settings.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::ingest::config::clean_list;

pub const ENV_SETTINGS_PATH: &str = "SETTINGS_PATH";
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.json";

fn default_timezone() -> String {
    "+09:00".to_string()
}
fn default_min_relevance() -> u8 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filtering {
    #[serde(default = "default_min_relevance")]
    pub min_relevance_score: u8,
    #[serde(default)]
    pub min_importance_score: u8,
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
}

impl Default for Filtering {
    fn default() -> Self {
        Self {
            min_relevance_score: default_min_relevance(),
            min_importance_score: 0,
            excluded_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordSet {
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportanceLevels {
    #[serde(default)]
    pub high: KeywordSet,
    #[serde(default)]
    pub medium: KeywordSet,
    #[serde(default)]
    pub low: KeywordSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgmentCriteria {
    #[serde(default)]
    pub importance_levels: ImportanceLevels,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Contents of `config/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Who or what the mentions are about; embedded in the judge prompt.
    #[serde(default)]
    pub subject: String,
    /// Fixed UTC offset used for run ids and timestamps, e.g. `+09:00`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub filtering: Filtering,
    #[serde(default)]
    pub judgment_criteria: JudgmentCriteria,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subject: String::new(),
            timezone: default_timezone(),
            filtering: Filtering::default(),
            judgment_criteria: JudgmentCriteria::default(),
        }
    }
}

impl Settings {
    /// Load from an explicit path. Supports TOML or JSON formats (by extension).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let parsed: Settings = if ext == "toml" {
            toml::from_str(&content).context("parsing settings toml")?
        } else {
            serde_json::from_str(&content).context("parsing settings json")?
        };
        let cfg = parsed.cleaned();
        // Fail at load time rather than at the first run.
        cfg.offset()?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $SETTINGS_PATH
    /// 2) config/settings.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SETTINGS_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("SETTINGS_PATH points to non-existent path"));
        }
        Self::load_from(Path::new(DEFAULT_SETTINGS_PATH))
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        self.timezone
            .trim()
            .parse::<FixedOffset>()
            .map_err(|e| anyhow!("invalid timezone offset '{}': {e}", self.timezone))
    }

    fn cleaned(mut self) -> Self {
        let f = &mut self.filtering;
        f.min_relevance_score = f.min_relevance_score.min(100);
        f.min_importance_score = f.min_importance_score.min(100);
        f.excluded_keywords = clean_list(std::mem::take(&mut f.excluded_keywords));

        let c = &mut self.judgment_criteria;
        c.categories = clean_list(std::mem::take(&mut c.categories));
        for set in [
            &mut c.importance_levels.high,
            &mut c.importance_levels.medium,
            &mut c.importance_levels.low,
        ] {
            set.keywords = clean_list(std::mem::take(&mut set.keywords));
        }
        self
    }
}

// src/judge/prompt.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Settings;

pub const ENV_PROMPTS_DIR: &str = "PROMPTS_DIR";
pub const DEFAULT_PROMPTS_DIR: &str = "config/prompts";
pub const JUDGE_PROMPT_FILE: &str = "judge_agent_prompt.txt";

/// `$PROMPTS_DIR` or `config/prompts`.
pub fn prompts_dir() -> PathBuf {
    std::env::var(ENV_PROMPTS_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROMPTS_DIR))
}

/// Read the judge template from `dir` and fill it from settings.
pub fn load_judge_prompt(dir: &Path, settings: &Settings) -> Result<String> {
    let path = dir.join(JUDGE_PROMPT_FILE);
    let template = fs::read_to_string(&path)
        .with_context(|| format!("reading judge prompt {}", path.display()))?;
    Ok(render_judge_prompt(&template, settings))
}

pub fn render_judge_prompt(template: &str, settings: &Settings) -> String {
    let levels = &settings.judgment_criteria.importance_levels;
    let categories = settings
        .judgment_criteria
        .categories
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");

    template
        .replace("{SUBJECT}", &settings.subject)
        .replace("{HIGH_KEYWORDS}", &levels.high.keywords.join(", "))
        .replace("{MEDIUM_KEYWORDS}", &levels.medium.keywords.join(", "))
        .replace("{LOW_KEYWORDS}", &levels.low.keywords.join(", "))
        .replace("{CATEGORIES}", &categories)
        .replace(
            "{EXCLUDED_KEYWORDS}",
            &settings.filtering.excluded_keywords.join(", "),
        )
}

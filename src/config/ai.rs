// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";
pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

fn default_provider() -> String {
    "claude".to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_api_key() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "claude" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// "ENV" means: read from CLAUDE_API_KEY, then ANTHROPIC_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Override for the Messages API root, e.g. a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: default_api_key(),
            base_url: None,
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: AiConfig = serde_json::from_str(&data)?;
        Ok(cfg.normalized())
    }

    /// `$AI_CONFIG_PATH`, then `config/ai.json`, then built-in defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_AI_CONFIG_PATH) {
            return Self::load_from_file(p);
        }
        let p = Path::new(DEFAULT_AI_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(p);
        }
        Ok(Self::default())
    }

    fn normalized(mut self) -> Self {
        self.provider = self.provider.trim().to_lowercase();
        self
    }

    /// Resolve the API key, following "ENV" indirection.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.trim().to_string());
        }
        match self.provider.as_str() {
            "claude" => env::var("CLAUDE_API_KEY")
                .or_else(|_| env::var("ANTHROPIC_API_KEY"))
                .map_err(|_| anyhow::anyhow!("Missing CLAUDE_API_KEY env var")),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        }
    }
}

//! Judgment capability: provider abstraction + Claude Messages API client.
//!
//! A client receives the whole item batch and returns the judge's raw text.
//! Parsing and merging happen in the processor, so every client stays dumb.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::model::RawItem;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One judgment call: the system prompt plus every unique item of the run.
pub struct JudgeRequest<'a> {
    pub system_prompt: &'a str,
    pub items: &'a [RawItem],
}

impl JudgeRequest<'_> {
    /// User turn sent to the model: the items as pretty JSON plus the output instruction.
    pub fn user_prompt(&self) -> Result<String> {
        let items_json =
            serde_json::to_string_pretty(self.items).context("serializing items for judge")?;
        Ok(format!(
            "Judge the relevance and importance of each collected item below.\n\n\
             [Collected items]\n{items_json}\n\n\
             Return one judgment per item as a JSON array. Each object must contain \
             url, relevance_score, importance_score, importance_level, category, summary and claude_reason."
        ))
    }
}

#[async_trait::async_trait]
pub trait JudgeClient: Send + Sync {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<String>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynJudgeClient = Arc<dyn JudgeClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else builds the configured provider (only `claude` is supported).
pub fn build_judge_client(config: &AiConfig) -> Result<DynJudgeClient> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        tracing::warn!(target: "judge", "AI_TEST_MODE=mock: using mock judge");
        return Ok(Arc::new(MockJudgeClient));
    }

    match config.provider.as_str() {
        "claude" => {
            let key = config.resolve_api_key()?;
            let mut client = ClaudeClient::new(key, &config.model)?.with_max_tokens(config.max_tokens);
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client))
        }
        other => bail!("unsupported judge provider '{other}'"),
    }
}

// ------------------------------------------------------------
// Claude
// ------------------------------------------------------------

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mention-tracker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .context("building claude http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl JudgeClient for ClaudeClient {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<String> {
        let user = request.user_prompt()?;
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: request.system_prompt,
            messages: vec![WireMessage {
                role: "user",
                content: &user,
            }],
            temperature: 0.0,
        };

        tracing::debug!(target: "judge", model = %self.model, items = request.items.len(), "claude request");

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .context("claude post")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Claude API error ({status}): {text}");
        }

        let parsed: ChatResponse = resp.json().await.context("claude response body")?;
        parsed
            .content
            .into_iter()
            .find_map(|b| match b {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| anyhow!("no text block in Claude response"))
    }

    fn provider_name(&self) -> &'static str {
        "claude"
    }
}

// ------------------------------------------------------------
// Mock + canned clients
// ------------------------------------------------------------

/// Judges every item as moderately relevant. For local runs without an API key.
pub struct MockJudgeClient;

#[async_trait::async_trait]
impl JudgeClient for MockJudgeClient {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<String> {
        let out: Vec<serde_json::Value> = request
            .items
            .iter()
            .map(|it| {
                let summary: String = it
                    .title
                    .as_deref()
                    .or(it.content.as_deref())
                    .unwrap_or_default()
                    .chars()
                    .take(50)
                    .collect();
                serde_json::json!({
                    "url": it.url,
                    "relevance_score": 50,
                    "importance_score": 50,
                    "importance_level": "medium",
                    "category": "other",
                    "summary": summary,
                    "claude_reason": "mock judgment",
                })
            })
            .collect();
        Ok(serde_json::to_string(&out)?)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Returns the same text (or error) on every call and counts the calls.
pub struct CannedJudgeClient {
    response: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl CannedJudgeClient {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JudgeClient for CannedJudgeClient {
    async fn judge(&self, _request: &JudgeRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(msg) => Err(anyhow!(msg.clone())),
        }
    }

    fn provider_name(&self) -> &'static str {
        "canned"
    }
}

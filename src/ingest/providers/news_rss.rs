// src/ingest/providers/news_rss.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::config::NewsFeedCfg;
use crate::ingest::normalize_text;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::Collector;
use crate::model::{RawItem, Source};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// RFC 2822 `pubDate` → ISO-8601. Unparsable input is passed through; the store
/// substitutes the current time for it.
fn rfc2822_to_iso(ts: &str) -> String {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.trim().to_string())
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// News search results delivered as an RSS feed (Yahoo! News, Modelpress).
pub struct NewsRssCollector {
    source: Source,
    keyword: String,
    mode: Mode,
    policy: RetryPolicy,
}

impl NewsRssCollector {
    pub fn from_fixture(source: Source, keyword: &str, xml: &str) -> Self {
        Self {
            source,
            keyword: keyword.trim().to_string(),
            mode: Mode::Fixture(xml.to_string()),
            policy: RetryPolicy::default(),
        }
    }

    pub fn from_config(source: Source, cfg: &NewsFeedCfg) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("building news http client")?;
        Ok(Self {
            source,
            keyword: cfg.search_keyword.trim().to_string(),
            mode: Mode::Http {
                url: cfg.feed_url.clone(),
                client,
            },
            policy: cfg.retry.policy(),
        })
    }

    fn source_detail(&self) -> String {
        if self.keyword.is_empty() {
            "feed".to_string()
        } else {
            format!("search:{}", self.keyword)
        }
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawItem>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing {} rss xml", self.source))?;

        let detail = self.source_detail();
        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = it.title.as_deref().map(normalize_text).unwrap_or_default();
            let content = it
                .description
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default();
            if !self.keyword.is_empty()
                && !title.contains(&self.keyword)
                && !content.contains(&self.keyword)
            {
                continue;
            }
            let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
            else {
                continue;
            };

            out.push(RawItem {
                source: self.source,
                source_detail: detail.clone(),
                title: Some(title).filter(|t| !t.is_empty()),
                content: Some(content).filter(|c| !c.is_empty()),
                url,
                published_at: it.pub_date.as_deref().map(rfc2822_to_iso).unwrap_or_default(),
                metrics: None,
                author: None,
                author_account: None,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Collector for NewsRssCollector {
    async fn collect(&self) -> Result<Vec<RawItem>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("{} http get", self.source))?
                    .error_for_status()
                    .with_context(|| format!("{} non-2xx", self.source))?
                    .text()
                    .await
                    .with_context(|| format!("{} http body", self.source))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        self.source.as_str()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_date_becomes_iso() {
        assert_eq!(
            rfc2822_to_iso("Tue, 04 Mar 2025 10:15:00 +0900"),
            "2025-03-04T10:15:00+09:00"
        );
        assert_eq!(rfc2822_to_iso("yesterday"), "yesterday");
    }
}

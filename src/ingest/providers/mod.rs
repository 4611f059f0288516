// src/ingest/providers/mod.rs
pub mod news_rss;
pub mod twitter;

use anyhow::Result;

use crate::ingest::config::SourcesConfig;
use crate::ingest::types::Collector;
use crate::model::Source;

use self::news_rss::NewsRssCollector;
use self::twitter::TwitterCollector;

/// Build the enabled collectors in fixed order: twitter, yahoo_news, modelpress.
pub fn build_collectors(cfg: &SourcesConfig) -> Result<Vec<Box<dyn Collector>>> {
    let mut out: Vec<Box<dyn Collector>> = Vec::new();

    if let Some(tw) = cfg.twitter.as_ref().filter(|c| c.enabled) {
        out.push(Box::new(TwitterCollector::from_config(tw)));
    }
    if let Some(y) = cfg.yahoo_news.as_ref().filter(|c| c.enabled) {
        out.push(Box::new(NewsRssCollector::from_config(Source::YahooNews, y)?));
    }
    if let Some(m) = cfg.modelpress.as_ref().filter(|c| c.enabled) {
        out.push(Box::new(NewsRssCollector::from_config(Source::Modelpress, m)?));
    }

    tracing::info!(
        target: "ingest",
        collectors = ?out.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
        "collectors registered"
    );
    Ok(out)
}

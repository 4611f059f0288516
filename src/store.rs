//! Persistence Gateway on SQLite.
//!
//! Every write runs in its own short transaction; a transaction that is dropped
//! before `commit` rolls back. Timestamps are stored as UTC RFC 3339 text so
//! ordering on the column equals ordering in time.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat,
    TimeZone, Utc,
};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::StoreError;
use crate::model::{
    AgentResults, ImportanceLevel, JudgedItem, PersistedItem, RunRecord, RunStatus, Source,
};
use crate::run::RunId;

pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const DEFAULT_DATABASE_PATH: &str = "data/mention_tracker.db";

/// `$DATABASE_PATH` or `data/mention_tracker.db`.
pub fn database_path() -> PathBuf {
    std::env::var(ENV_DATABASE_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH))
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL,
        total_collected INTEGER NOT NULL DEFAULT 0,
        total_saved INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        agent_results TEXT,
        claude_processed INTEGER,
        claude_duration_sec REAL
    )",
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        source_detail TEXT,
        title TEXT,
        content TEXT,
        summary TEXT,
        url TEXT NOT NULL UNIQUE,
        published_at TEXT NOT NULL,
        relevance_score INTEGER,
        importance_score INTEGER,
        importance_level TEXT,
        category TEXT,
        claude_reason TEXT,
        metrics TEXT,
        collected_at TEXT NOT NULL,
        execution_id TEXT NOT NULL REFERENCES executions(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_items_published_at ON items(published_at)",
    "CREATE INDEX IF NOT EXISTS idx_items_importance_score ON items(importance_score)",
    "CREATE INDEX IF NOT EXISTS idx_items_category ON items(category)",
    "CREATE INDEX IF NOT EXISTS idx_items_execution_id ON items(execution_id)",
    "CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at)",
];

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("store_items_saved_total", "Items inserted into the store.");
        describe_counter!(
            "store_items_skipped_total",
            "Items skipped at save because their url was already stored."
        );
    });
}

fn ts(dt: &DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(column: &'static str, s: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_rfc3339(s).map_err(|e| StoreError::Decode {
        column,
        message: format!("{s}: {e}"),
    })
}

/// Parse a collector's ISO-8601 `published_at`.
///
/// Text without an offset is read in `now`'s timezone; a bare date is local
/// midnight. Anything unparsable becomes `now`.
pub fn normalize_published_at(raw: &str, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt;
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return dt;
        }
    }
    let tz = *now.offset();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            if let Some(dt) = tz.from_local_datetime(&naive).single() {
                return dt;
            }
        }
    }
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|n| tz.from_local_datetime(&n).single())
    {
        return dt;
    }
    tracing::warn!(target: "store", published_at = %raw, "unparsable published_at; using current time");
    now
}

/// Terminal fields written by [`Store::update_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    /// `None` keeps the stored value (collection never finished).
    pub total_collected: Option<usize>,
    pub total_saved: usize,
    pub error_message: Option<String>,
    pub agent_results: Option<AgentResults>,
    pub claude_processed: Option<usize>,
    pub claude_duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Period {
    #[serde(rename = "24h")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl Period {
    pub fn window(&self) -> Option<ChronoDuration> {
        match self {
            Period::Day => Some(ChronoDuration::hours(24)),
            Period::Week => Some(ChronoDuration::days(7)),
            Period::Month => Some(ChronoDuration::days(30)),
            Period::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceFilter {
    #[default]
    All,
    High,
    MediumUp,
}

/// Filters for the item listing. Field names match the HTTP query string.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ItemQuery {
    pub period: Period,
    pub importance: ImportanceFilter,
    /// `"all"` or empty means no category filter.
    pub category: Option<String>,
    pub keyword: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            period: Period::Week,
            importance: ImportanceFilter::All,
            category: None,
            keyword: None,
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<PersistedItem>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub has_next: bool,
}

fn push_item_filters(qb: &mut QueryBuilder<'_, Sqlite>, q: &ItemQuery, now: DateTime<Utc>) {
    qb.push(" WHERE 1 = 1");
    if let Some(window) = q.period.window() {
        let cutoff = (now - window).to_rfc3339_opts(SecondsFormat::Secs, true);
        qb.push(" AND published_at >= ").push_bind(cutoff);
    }
    match q.importance {
        ImportanceFilter::All => {}
        ImportanceFilter::High => {
            qb.push(" AND importance_level = 'high'");
        }
        ImportanceFilter::MediumUp => {
            qb.push(" AND importance_level IN ('high', 'medium')");
        }
    }
    if let Some(cat) = q
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "all")
    {
        qb.push(" AND category = ").push_bind(cat.to_string());
    }
    if let Some(kw) = q.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let pattern = format!("%{kw}%");
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR content LIKE ")
            .push_bind(pattern.clone())
            .push(" OR summary LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn item_from_row(row: &SqliteRow) -> Result<PersistedItem, StoreError> {
    let source: String = row.try_get("source")?;
    let level: Option<String> = row.try_get("importance_level")?;
    let metrics: Option<String> = row.try_get("metrics")?;
    let published: String = row.try_get("published_at")?;
    let collected: String = row.try_get("collected_at")?;

    Ok(PersistedItem {
        id: row.try_get("id")?,
        source: Source::from_str(&source).map_err(|message| StoreError::Decode {
            column: "source",
            message,
        })?,
        source_detail: row.try_get("source_detail")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        url: row.try_get("url")?,
        published_at: parse_ts("published_at", &published)?,
        relevance_score: row.try_get("relevance_score")?,
        importance_score: row.try_get("importance_score")?,
        importance_level: level
            .map(|l| {
                ImportanceLevel::from_str(&l).map_err(|message| StoreError::Decode {
                    column: "importance_level",
                    message,
                })
            })
            .transpose()?,
        category: row.try_get("category")?,
        claude_reason: row.try_get("claude_reason")?,
        metrics: metrics.map(|m| serde_json::from_str(&m)).transpose()?,
        collected_at: parse_ts("collected_at", &collected)?,
        execution_id: row.try_get("execution_id")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, StoreError> {
    let started: String = row.try_get("started_at")?;
    let completed: Option<String> = row.try_get("completed_at")?;
    let status: String = row.try_get("status")?;
    let agent_results: Option<String> = row.try_get("agent_results")?;

    Ok(RunRecord {
        id: row.try_get("id")?,
        started_at: parse_ts("started_at", &started)?,
        completed_at: completed
            .map(|c| parse_ts("completed_at", &c))
            .transpose()?,
        status: RunStatus::from_str(&status).map_err(|message| StoreError::Decode {
            column: "status",
            message,
        })?,
        total_collected: row.try_get("total_collected")?,
        total_saved: row.try_get("total_saved")?,
        error_message: row.try_get("error_message")?,
        agent_results: agent_results.map(|a| serde_json::from_str(&a)).transpose()?,
        claude_processed: row.try_get("claude_processed")?,
        claude_duration_sec: row.try_get("claude_duration_sec")?,
    })
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) a database file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        tracing::info!(target: "store", path = %path.display(), "sqlite opened");
        Ok(Self { pool })
    }

    /// Private in-memory database. One connection that never expires, since
    /// the data lives and dies with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert the run row in `running` state.
    pub async fn create_run(
        &self,
        id: &RunId,
        started_at: DateTime<FixedOffset>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO executions (id, started_at, status, total_collected, total_saved) \
             VALUES (?, ?, ?, 0, 0)",
        )
        .bind(id.as_str())
        .bind(ts(&started_at))
        .bind(RunStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::debug!(target: "store", execution_id = %id, "run created");
        Ok(())
    }

    /// Insert items whose url is not stored yet; returns how many were inserted.
    /// Any failed insert rolls back the whole call.
    pub async fn save_items(
        &self,
        items: &[JudgedItem],
        execution_id: &RunId,
        now: DateTime<FixedOffset>,
    ) -> Result<usize, StoreError> {
        ensure_metrics_described();

        let collected_at = ts(&now);
        let mut tx = self.pool.begin().await?;
        let mut saved = 0usize;
        let mut skipped = 0usize;

        for it in items {
            let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM items WHERE url = ?")
                .bind(it.url())
                .fetch_optional(&mut *tx)
                .await?;
            if existing.is_some() {
                skipped += 1;
                tracing::info!(target: "store", url = %it.url(), "url already stored; skipped");
                continue;
            }

            let published = normalize_published_at(&it.item.published_at, now);
            let metrics = it
                .item
                .metrics
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let j = &it.judgment;

            sqlx::query(
                "INSERT INTO items (source, source_detail, title, content, summary, url, published_at, \
                 relevance_score, importance_score, importance_level, category, claude_reason, metrics, \
                 collected_at, execution_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(it.item.source.as_str())
            .bind(&it.item.source_detail)
            .bind(it.item.title.as_deref())
            .bind(it.item.content.as_deref())
            .bind(&j.summary)
            .bind(it.url())
            .bind(ts(&published))
            .bind(i64::from(j.relevance_score))
            .bind(i64::from(j.importance_score))
            .bind(j.importance_level.as_str())
            .bind(&j.category)
            .bind(&j.claude_reason)
            .bind(metrics)
            .bind(&collected_at)
            .bind(execution_id.as_str())
            .execute(&mut *tx)
            .await?;
            saved += 1;
        }

        tx.commit().await?;
        counter!("store_items_saved_total").increment(saved as u64);
        counter!("store_items_skipped_total").increment(skipped as u64);
        tracing::info!(target: "store", execution_id = %execution_id, saved, skipped, "items saved");
        Ok(saved)
    }

    /// Stamp `completed_at` and write the terminal fields. Only a `running`
    /// row is touched; returns whether one was.
    pub async fn update_run(
        &self,
        id: &RunId,
        completed_at: DateTime<FixedOffset>,
        update: &RunUpdate,
    ) -> Result<bool, StoreError> {
        let agent_results = update
            .agent_results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE executions SET completed_at = ?, status = ?, \
             total_collected = COALESCE(?, total_collected), total_saved = ?, error_message = ?, \
             agent_results = ?, claude_processed = ?, claude_duration_sec = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(ts(&completed_at))
        .bind(update.status.as_str())
        .bind(update.total_collected.map(|n| n as i64))
        .bind(update.total_saved as i64)
        .bind(update.error_message.as_deref())
        .bind(agent_results)
        .bind(update.claude_processed.map(|n| n as i64))
        .bind(update.claude_duration_sec)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let updated = res.rows_affected() == 1;
        if !updated {
            tracing::warn!(target: "store", execution_id = %id, "run not in running state; update ignored");
        }
        Ok(updated)
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Latest runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM executions ORDER BY started_at DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    pub async fn count_items(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Filtered page of items, highest importance then newest first.
    pub async fn list_items(
        &self,
        q: &ItemQuery,
        now: DateTime<Utc>,
    ) -> Result<ItemPage, StoreError> {
        let page = q.page.max(1);
        let per_page = q.per_page.clamp(1, 100);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM items");
        push_item_filters(&mut count_qb, q, now);
        let total: i64 = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM items");
        push_item_filters(&mut qb, q, now);
        qb.push(" ORDER BY importance_score DESC, published_at DESC LIMIT ")
            .push_bind(i64::from(per_page))
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(ItemPage {
            items,
            total,
            page,
            per_page,
            has_next: offset + i64::from(per_page) < total,
        })
    }
}

// tests/pipeline_e2e.rs
//
// Whole-run scenarios: scripted collectors → dedup → canned judge → in-memory store.
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;
use common::{fenced, item, judgment, memory_store, pipeline, t0, RecordingSleeper, ScriptedCollector};
use mention_tracker::ingest::types::Collector;
use mention_tracker::judge::client::CannedJudgeClient;
use mention_tracker::model::{RunStatus, Source};
use mention_tracker::pipeline::RunStage;
use mention_tracker::run::RunId;

/// Three sources, two items each; `https://shared/1` appears in twitter and yahoo.
fn three_sources() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(ScriptedCollector::ok(
            "twitter",
            vec![
                item(Source::Twitter, "https://t/1", "tweet one"),
                item(Source::Twitter, "https://shared/1", "shared via twitter"),
            ],
        )),
        Box::new(ScriptedCollector::ok(
            "yahoo_news",
            vec![
                item(Source::YahooNews, "https://shared/1", "shared via yahoo"),
                item(Source::YahooNews, "https://y/2", "yahoo two"),
            ],
        )),
        Box::new(ScriptedCollector::ok(
            "modelpress",
            vec![
                item(Source::Modelpress, "https://m/1", "mdpr one"),
                item(Source::Modelpress, "https://m/2", "mdpr two"),
            ],
        )),
    ]
}

fn five_judgments_three_pass() -> String {
    fenced(&[
        judgment("https://t/1", 90, 70, "high"),
        judgment("https://shared/1", 80, 50, "medium"),
        judgment("https://y/2", 5, 5, "low"),
        judgment("https://m/1", 40, 20, "low"),
        judgment("https://m/2", 29, 90, "high"),
    ])
}

#[tokio::test]
async fn six_collected_five_unique_three_saved() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(five_judgments_three_pass()));
    let p = pipeline(three_sources(), judge.clone(), store.clone(), Arc::default());

    let id = RunId::for_start(&t0());
    let summary = p.execute(id.clone(), t0()).await;

    assert_eq!(summary.status, RunStatus::Success, "{summary:?}");
    assert_eq!(summary.total_collected, 6);
    assert_eq!(summary.total_saved, 3);
    assert_eq!(summary.claude_processed, 3);
    assert!(summary.error.is_none());
    assert_eq!(judge.calls(), 1);

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.completed_at.is_some());
    assert_eq!((run.total_collected, run.total_saved), (6, 3));
    assert_eq!(run.claude_processed, Some(3));
    assert!(run.claude_duration_sec.is_some());
    let agents = run.agent_results.unwrap();
    assert_eq!(agents["modelpress"]["count"], 2);
    assert_eq!(agents["yahoo_news"]["status"], "success");

    assert_eq!(store.count_items().await.unwrap(), 3);
}

#[tokio::test]
async fn shared_url_is_stored_as_first_seen_source() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(five_judgments_three_pass()));
    let p = pipeline(three_sources(), judge, store.clone(), Arc::default());
    p.execute(RunId::for_start(&t0()), t0()).await;

    let page = store
        .list_items(
            &mention_tracker::store::ItemQuery {
                period: mention_tracker::store::Period::All,
                keyword: Some("shared".into()),
                ..Default::default()
            },
            chrono::Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].source, Source::Twitter);
}

#[tokio::test]
async fn missing_judgment_drops_one_item_and_run_succeeds() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(fenced(&[
        judgment("https://t/1", 90, 70, "high"),
        // https://shared/1 omitted
        judgment("https://y/2", 60, 5, "low"),
        judgment("https://m/1", 40, 20, "low"),
        judgment("https://m/2", 70, 90, "high"),
    ])));
    let p = pipeline(three_sources(), judge, store.clone(), Arc::default());

    let summary = p.execute(RunId::for_start(&t0()), t0()).await;
    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.total_collected, 6);
    assert_eq!(summary.total_saved, 4);
}

#[tokio::test]
async fn second_collector_exhausting_retries_fails_the_run() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok("[]"));
    let yahoo = ScriptedCollector::always_failing("yahoo_news");
    let mdpr = ScriptedCollector::ok("modelpress", vec![item(Source::Modelpress, "https://m/1", "m")]);
    let (yahoo_calls, mdpr_calls) = (yahoo.calls(), mdpr.calls());
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(ScriptedCollector::ok(
            "twitter",
            vec![item(Source::Twitter, "https://t/1", "t")],
        )),
        Box::new(yahoo),
        Box::new(mdpr),
    ];
    let sleeper = Arc::new(RecordingSleeper::default());
    let p = pipeline(collectors, judge.clone(), store.clone(), sleeper.clone());

    let id = RunId::for_start(&t0());
    let summary = p.execute(id.clone(), t0()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failed_stage, Some(RunStage::Collecting));
    assert_eq!(summary.total_saved, 0);
    let err = summary.error.as_deref().unwrap();
    assert!(err.contains("yahoo_news"), "{err}");
    assert!(err.contains("3 attempts"), "{err}");
    assert!(summary.message.contains("yahoo_news"));

    assert_eq!(yahoo_calls.load(Ordering::SeqCst), 3);
    assert_eq!(mdpr_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sleeper.0.lock().unwrap().len(), 2);
    assert_eq!(judge.calls(), 0);
    assert_eq!(store.count_items().await.unwrap(), 0);

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert!(run.error_message.unwrap().contains("yahoo_news"));
    let agents = run.agent_results.unwrap();
    assert_eq!(agents["twitter"]["status"], "success");
    assert_eq!(agents["yahoo_news"]["status"], "failed");
    assert_eq!(agents["yahoo_news"]["attempts"], 3);
}

#[tokio::test]
async fn zero_items_is_a_successful_run_without_judge_call() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::failing("must not be called"));
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(ScriptedCollector::ok("twitter", Vec::new())),
        Box::new(ScriptedCollector::ok("yahoo_news", Vec::new())),
    ];
    let p = pipeline(collectors, judge.clone(), store.clone(), Arc::default());

    let id = RunId::for_start(&t0());
    let summary = p.execute(id.clone(), t0()).await;
    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!((summary.total_collected, summary.total_saved), (0, 0));
    assert_eq!(judge.calls(), 0);

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.total_saved, 0);
}

#[tokio::test]
async fn judge_failure_fails_the_run_before_any_write() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok("no JSON here, sorry"));
    let p = pipeline(three_sources(), judge, store.clone(), Arc::default());

    let id = RunId::for_start(&t0());
    let summary = p.execute(id.clone(), t0()).await;
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failed_stage, Some(RunStage::Judging));
    assert_eq!(summary.total_collected, 6);
    assert_eq!(store.count_items().await.unwrap(), 0);

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.total_collected, 6, "known totals are kept on failure");
}

#[tokio::test]
async fn rerun_with_same_urls_saves_nothing_new() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(five_judgments_three_pass()));
    let p = pipeline(three_sources(), judge, store.clone(), Arc::default());

    let first = p.execute(RunId::for_start(&t0()), t0()).await;
    let later = t0() + Duration::hours(1);
    let second = p.execute(RunId::for_start(&later), later).await;

    assert_eq!(first.total_saved, 3);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.total_saved, 0);
    assert_eq!(store.count_items().await.unwrap(), 3);

    // Every run ends with exactly one terminal status and a completion time.
    for run in store.list_runs(10).await.unwrap() {
        assert!(run.status.is_terminal());
        assert!(run.completed_at.is_some());
    }
}

#[tokio::test]
async fn duplicate_run_id_fails_without_touching_the_first_run() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(five_judgments_three_pass()));
    let p = pipeline(three_sources(), judge, store.clone(), Arc::default());

    let id = RunId::for_start(&t0());
    assert!(p.execute(id.clone(), t0()).await.is_success());
    let again = p.execute(id.clone(), t0()).await;
    assert_eq!(again.status, RunStatus::Failed);
    assert_eq!(again.failed_stage, Some(RunStage::Created));

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.total_saved, 3);
}

/// Marks the ledger row terminal behind the orchestrator's back while collecting.
struct LedgerClosingCollector {
    store: mention_tracker::store::Store,
}

#[async_trait::async_trait]
impl Collector for LedgerClosingCollector {
    async fn collect(&self) -> anyhow::Result<Vec<mention_tracker::model::RawItem>> {
        sqlx::query("UPDATE executions SET status = 'failed'")
            .execute(self.store.pool())
            .await?;
        Ok(vec![item(Source::Twitter, "https://t/1", "t")])
    }

    fn name(&self) -> &str {
        "twitter"
    }
}

#[tokio::test]
async fn unwritten_final_ledger_update_fails_the_summary() {
    let store = memory_store().await;
    let judge = Arc::new(CannedJudgeClient::ok(fenced(&[judgment(
        "https://t/1",
        90,
        70,
        "high",
    )])));
    let collectors: Vec<Box<dyn Collector>> = vec![Box::new(LedgerClosingCollector {
        store: store.clone(),
    })];
    let p = pipeline(collectors, judge, store.clone(), Arc::default());

    let id = RunId::for_start(&t0());
    let summary = p.execute(id.clone(), t0()).await;
    assert_eq!(summary.status, RunStatus::Failed);
    let err = summary.error.as_deref().unwrap();
    assert!(err.contains("not finalised"), "{err}");

    let run = store.get_run(id.as_str()).await.unwrap().unwrap();
    assert!(run.completed_at.is_none(), "ledger row was not touched");
}

// tests/ingest_collect.rs
mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{item, RecordingSleeper, ScriptedCollector};
use mention_tracker::ingest::collect_all;
use mention_tracker::ingest::types::Collector;
use mention_tracker::model::{RunStatus, Source};

#[tokio::test]
async fn all_succeed_concatenates_in_registration_order() {
    let a = ScriptedCollector::ok("twitter", vec![item(Source::Twitter, "https://a/1", "a1")]);
    let b = ScriptedCollector::ok(
        "yahoo_news",
        vec![
            item(Source::YahooNews, "https://b/1", "b1"),
            item(Source::YahooNews, "https://b/2", "b2"),
        ],
    )
    .failing_first(1);
    let collectors: Vec<Box<dyn Collector>> = vec![Box::new(a), Box::new(b)];
    let sleeper = RecordingSleeper::default();

    let c = collect_all(&collectors, &sleeper).await.expect("collection ok");

    let urls: Vec<_> = c.items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a/1", "https://b/1", "https://b/2"]);
    assert_eq!(c.results["twitter"].attempts, 1);
    assert_eq!(c.results["yahoo_news"].attempts, 2);
    assert_eq!(c.results["yahoo_news"].count, 2);
    assert_eq!(c.results["yahoo_news"].status, RunStatus::Success);
    // One retry, one delay.
    assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn exhausted_collector_aborts_and_later_ones_never_run() {
    let a = ScriptedCollector::ok("twitter", vec![item(Source::Twitter, "https://a/1", "a1")]);
    let b = ScriptedCollector::always_failing("yahoo_news");
    let c = ScriptedCollector::ok("modelpress", vec![item(Source::Modelpress, "https://c/1", "c1")]);
    let (b_calls, c_calls) = (b.calls(), c.calls());
    let collectors: Vec<Box<dyn Collector>> = vec![Box::new(a), Box::new(b), Box::new(c)];
    let sleeper = RecordingSleeper::default();

    let failure = collect_all(&collectors, &sleeper)
        .await
        .expect_err("second collector should exhaust its retries");

    assert_eq!(failure.collector, "yahoo_news");
    assert_eq!(failure.attempts, 3);
    assert_eq!(b_calls.load(Ordering::SeqCst), 3);
    assert_eq!(c_calls.load(Ordering::SeqCst), 0, "fail-fast: modelpress must not run");
    assert!(failure.error.to_string().contains("yahoo_news unreachable"));

    assert_eq!(failure.results["twitter"].status, RunStatus::Success);
    assert_eq!(failure.results["yahoo_news"].status, RunStatus::Failed);
    assert!(!failure.results.contains_key("modelpress"));

    // retries=2 → three attempts, two constant delays, none after the last.
    assert_eq!(sleeper.0.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_successful_collector_is_not_a_failure() {
    let collectors: Vec<Box<dyn Collector>> =
        vec![Box::new(ScriptedCollector::ok("twitter", Vec::new()))];
    let c = collect_all(&collectors, &RecordingSleeper::default())
        .await
        .unwrap();
    assert!(c.items.is_empty());
    assert_eq!(c.results["twitter"].count, 0);
}

//! Integration tests for the ingestion pipeline: sources in SQLite, feeds
//! served by wiremock, sweeps and per-user runs end to end.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use std::sync::Arc;
use std::time::Duration;

use newswire::feed::{FeedFetcher, RetryPolicy};
use newswire::ingest::{IngestError, Ingestor};
use newswire::storage::Database;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><title>{title}</title><link>https://news.example.com/{guid}</link>\
                 <guid>{guid}</guid><pubDate>Mon, 02 Jan 2023 15:04:05 GMT</pubDate>\
                 <description>About {title}</description></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{body}</channel></rss>"#)
}

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn ingestor(db: &Database) -> Ingestor {
    let fetcher = FeedFetcher::with_client(
        reqwest::Client::new(),
        RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        },
    );
    Ingestor::new(Arc::new(db.clone()), fetcher).with_workers(4, 2)
}

async fn serve(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Full sweep
// ============================================================================

#[tokio::test]
async fn test_sweep_isolates_failing_source() {
    let server = MockServer::start().await;
    serve(&server, "/a.xml", 200, rss(&[("a1", "A one"), ("a2", "A two")])).await;
    serve(&server, "/b.xml", 500, String::new()).await;
    serve(&server, "/c.xml", 200, rss(&[("c1", "C one")])).await;

    let db = test_db().await;
    let a = db.add_source("A", &format!("{}/a.xml", server.uri()), None).await.unwrap();
    let b = db.add_source("B", &format!("{}/b.xml", server.uri()), None).await.unwrap();
    let c = db.add_source("C", &format!("{}/c.xml", server.uri()), None).await.unwrap();

    let outcome = ingestor(&db).run_full_sweep(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.saved, 3);
    assert_eq!(outcome.sources, 3);
    assert_eq!(outcome.failed_sources, 1);
    assert!(outcome.had_partial_failures());
    assert_eq!(db.count_news_for_source(a).await.unwrap(), 2);
    assert_eq!(db.count_news_for_source(b).await.unwrap(), 0);
    assert_eq!(db.count_news_for_source(c).await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_sweep_saves_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/a.xml", 200, rss(&[("a1", "A one"), ("a2", "A two")])).await;

    let db = test_db().await;
    let a = db.add_source("A", &format!("{}/a.xml", server.uri()), None).await.unwrap();
    let ingestor = ingestor(&db);
    let cancel = CancellationToken::new();

    assert_eq!(ingestor.run_full_sweep(&cancel).await.unwrap().saved, 2);
    assert_eq!(ingestor.run_full_sweep(&cancel).await.unwrap().saved, 0);
    assert_eq!(db.count_news_for_source(a).await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_sweeps_store_each_item_once() {
    let server = MockServer::start().await;
    let items: Vec<(String, String)> = (0..20).map(|i| (format!("g{i}"), format!("Item {i}"))).collect();
    let borrowed: Vec<(&str, &str)> = items.iter().map(|(g, t)| (g.as_str(), t.as_str())).collect();
    serve(&server, "/a.xml", 200, rss(&borrowed)).await;

    let db = test_db().await;
    let a = db.add_source("A", &format!("{}/a.xml", server.uri()), None).await.unwrap();
    let ingestor = ingestor(&db);
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(ingestor.run_full_sweep(&cancel), ingestor.run_full_sweep(&cancel));

    assert_eq!(first.unwrap().saved + second.unwrap().saved, 20);
    assert_eq!(db.count_news_for_source(a).await.unwrap(), 20);
}

#[tokio::test]
async fn test_inactive_sources_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/off.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("x", "X")])))
        .expect(0)
        .mount(&server)
        .await;

    let db = test_db().await;
    let off = db.add_source("Off", &format!("{}/off.xml", server.uri()), None).await.unwrap();
    assert!(db.set_source_active(off, false).await.unwrap());

    let outcome = ingestor(&db).run_full_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.sources, 0);
    assert_eq!(outcome.saved, 0);
}

// ============================================================================
// Per-user run
// ============================================================================

#[tokio::test]
async fn test_run_for_user_only_touches_subscriptions() {
    let server = MockServer::start().await;
    serve(&server, "/mine.xml", 200, rss(&[("m1", "Mine")])).await;
    Mock::given(method("GET"))
        .and(path("/theirs.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("t1", "Theirs")])))
        .expect(0)
        .mount(&server)
        .await;

    let db = test_db().await;
    let mine = db.add_source("Mine", &format!("{}/mine.xml", server.uri()), None).await.unwrap();
    db.add_source("Theirs", &format!("{}/theirs.xml", server.uri()), None).await.unwrap();
    db.subscribe(7, mine).await.unwrap();

    let saved = ingestor(&db).run_for_user(7, &CancellationToken::new()).await.unwrap();
    assert_eq!(saved, 1);

    let (news, total) = db.news_for_user(7, 1, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(news[0].title, "Mine");
    assert_eq!(news[0].content.as_deref(), Some("About Mine"));
}

#[tokio::test]
async fn test_run_for_user_without_subscriptions_returns_zero() {
    let db = test_db().await;
    let saved = ingestor(&db).run_for_user(12345, &CancellationToken::new()).await.unwrap();
    assert_eq!(saved, 0);
}

#[tokio::test]
async fn test_run_for_user_continues_past_failing_source() {
    let server = MockServer::start().await;
    serve(&server, "/bad.xml", 200, "not a feed".to_string()).await;
    serve(&server, "/good.xml", 200, rss(&[("g1", "Good")])).await;

    let db = test_db().await;
    let bad = db.add_source("Bad", &format!("{}/bad.xml", server.uri()), None).await.unwrap();
    let good = db.add_source("Good", &format!("{}/good.xml", server.uri()), None).await.unwrap();
    db.subscribe(1, bad).await.unwrap();
    db.subscribe(1, good).await.unwrap();

    let saved = ingestor(&db).run_for_user(1, &CancellationToken::new()).await.unwrap();
    assert_eq!(saved, 1);
    assert_eq!(db.count_news_for_source(good).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_run_for_user_stops_early() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("x", "X")])))
        .expect(0)
        .mount(&server)
        .await;

    let db = test_db().await;
    let src = db.add_source("S", &format!("{}/s.xml", server.uri()), None).await.unwrap();
    db.subscribe(1, src).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ingestor(&db).run_for_user(1, &cancel).await.unwrap_err();
    assert!(matches!(err, IngestError::Cancelled { saved: 0 }));
}

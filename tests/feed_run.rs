//! End-to-end runs: subscriptions → fetch → cache → ranking → printed output.
//!
//! Feeds are served by a wiremock server and time is pinned with a fixed
//! clock, so output can be compared byte for byte.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tidings::app::{App, FeedOptions, Paths};
use tidings::clock::FixedClock;
use tidings::config::Config;
use tidings::feed::{Aggregator, ConditionalFetcher, RunError, RunOptions};
use tidings::storage::CacheStore;
use tidings::ui::{Printer, SharedBuffer};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALPHA: &str = r#"<rss version="2.0"><channel><title>Alpha</title>
<item><title>Fresh</title><link>https://alpha.example/fresh</link><pubDate>Fri, 10 May 2024 10:00:00 GMT</pubDate><category>Rust</category></item>
<item><title>Future</title><link>https://alpha.example/future</link><pubDate>Sat, 11 May 2024 09:00:00 GMT</pubDate></item>
</channel></rss>"#;

const BETA: &str = r#"<rss version="2.0"><channel><title>Beta</title>
<item><title>Older</title><link>https://beta.example/older</link><pubDate>Fri, 10 May 2024 08:00:00 GMT</pubDate></item>
</channel></rss>"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

async fn serve(server: &MockServer, route: &str, body: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "max-age=600")
                .set_body_string(body),
        )
        .expect(times)
        .mount(server)
        .await;
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: Paths,
    lists: BTreeMap<String, Vec<String>>,
    config: Config,
}

impl Harness {
    fn new(server: &MockServer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            config_dir: dir.path().join("config"),
            cache_dir: dir.path().join("cache"),
        };
        let lists = BTreeMap::from([
            ("news".to_string(), vec![format!("{}/alpha.xml", server.uri())]),
            (
                "tech".to_string(),
                vec![
                    format!("{}/beta.xml", server.uri()),
                    format!("{}/alpha.xml", server.uri()),
                ],
            ),
        ]);
        let config = Config {
            hide_future_items: true,
            summary: true,
            ..Config::default()
        };
        Self {
            _dir: dir,
            paths,
            lists,
            config,
        }
    }

    fn app(&self) -> (App, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let app = App::new(
            self.paths.clone(),
            self.config.clone(),
            Box::new(self.lists.clone()),
            Arc::new(FixedClock(now())),
            Printer::new(out.clone(), err.clone(), false),
        );
        (app, out, err)
    }
}

#[tokio::test]
async fn test_merged_feed_then_cached_rerun() {
    let server = MockServer::start().await;
    // Alpha is in two lists but must only be requested once per run
    serve(&server, "/alpha.xml", ALPHA, 1).await;
    serve(&server, "/beta.xml", BETA, 1).await;
    let harness = Harness::new(&server);

    let (mut app, out, err) = harness.app();
    app.feed(&FeedOptions::default()).await.unwrap();
    assert_eq!(
        out.contents(),
        "Beta   • Older\n\
         4h     https://beta.example/older\n\n\
         Alpha  • Fresh\n\
         2h     https://alpha.example/fresh\n\n\
         Displayed 2 items from 2 feeds (0 cached, 2 fetched) with 3 items in 0.00s\n"
    );
    assert_eq!(err.contents(), "");

    // Inside the max-age window nothing is requested and nothing is new
    let (mut app, out, _) = harness.app();
    app.feed(&FeedOptions::default()).await.unwrap();
    assert_eq!(
        out.contents(),
        "Beta   Older\n\
         4h     https://beta.example/older\n\n\
         Alpha  Fresh\n\
         2h     https://alpha.example/fresh\n\n\
         Displayed 2 items from 2 feeds (2 cached, 0 fetched) with 3 items in 0.00s\n"
    );
}

#[tokio::test]
async fn test_summary_counts_and_order() {
    let server = MockServer::start().await;
    serve(&server, "/alpha.xml", ALPHA, 1).await;
    serve(&server, "/beta.xml", BETA, 1).await;
    let harness = Harness::new(&server);

    let store = CacheStore::open(&harness.paths.cache_dir).unwrap();
    let clock = Arc::new(FixedClock(now()));
    let fetcher = ConditionalFetcher::from_config(&harness.config, None, clock.clone()).unwrap();
    let aggregator = Aggregator::new(fetcher, store, clock, &harness.config);

    let urls = vec![
        format!("{}/alpha.xml", server.uri()),
        format!("{}/beta.xml", server.uri()),
    ];
    let mut report = aggregator.run(urls, &RunOptions::default()).await.unwrap();
    tidings::ranking::sort_by_recency(&mut report.items);

    assert_eq!(report.summary.feeds_count, 2);
    assert_eq!(report.summary.feeds_fetched, 2);
    assert_eq!(report.summary.feeds_cached, 0);
    let titles: Vec<&str> = report.items.iter().map(|i| i.entry().title.as_str()).collect();
    assert_eq!(titles, vec!["Fresh", "Older"]);
    assert!(report.persist_error.is_none());
}

#[tokio::test]
async fn test_search_uses_cache_only() {
    let server = MockServer::start().await;
    serve(&server, "/alpha.xml", ALPHA, 1).await;
    serve(&server, "/beta.xml", BETA, 1).await;
    let harness = Harness::new(&server);

    let (mut app, _, _) = harness.app();
    app.feed(&FeedOptions::default()).await.unwrap();

    let (mut app, out, err) = harness.app();
    app.search("rust", &FeedOptions::default()).await.unwrap();
    assert_eq!(
        out.contents(),
        "Alpha  Fresh\n\
         2h     https://alpha.example/fresh\n\n\
         Displayed 1 item from 2 feeds (2 cached, 0 fetched) with 3 items in 0.00s\n"
    );
    assert_eq!(err.contents(), "");

    let (mut app, out, err) = harness.app();
    app.search("python", &FeedOptions::default()).await.unwrap();
    assert_eq!(out.contents(), "");
    assert_eq!(err.contents(), "no items to display\n");
}

#[tokio::test]
async fn test_single_list_and_limit() {
    let server = MockServer::start().await;
    serve(&server, "/alpha.xml", ALPHA, 1).await;
    serve(&server, "/beta.xml", BETA, 0).await;
    let harness = Harness::new(&server);

    let (mut app, out, _) = harness.app();
    let options = FeedOptions {
        list: Some("news".to_string()),
        limit: Some(1),
        ..Default::default()
    };
    app.feed(&options).await.unwrap();
    assert!(out.contents().starts_with("Alpha  • Fresh\n"));
    assert!(out
        .contents()
        .ends_with("Displayed 1 item from 1 feed (0 cached, 1 fetched) with 2 items in 0.00s\n"));
}

#[tokio::test]
async fn test_failing_feed_is_reported_not_fatal() {
    let server = MockServer::start().await;
    serve(&server, "/beta.xml", BETA, 1).await;
    Mock::given(method("GET"))
        .and(path("/alpha.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let harness = Harness::new(&server);

    let (mut app, out, err) = harness.app();
    app.feed(&FeedOptions::default()).await.unwrap();
    assert!(out.contents().starts_with("Beta  • Older\n"));
    assert_eq!(
        err.contents(),
        format!(
            "failed to fetch feed: {}/alpha.xml: unexpected status code: 500\n",
            server.uri()
        )
    );
}

#[tokio::test]
async fn test_unknown_list_has_no_feeds() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server);
    let (mut app, _, _) = harness.app();
    let options = FeedOptions {
        list: Some("missing".to_string()),
        ..Default::default()
    };
    let err = app.feed(&options).await.unwrap_err();
    assert_eq!(err.to_string(), "no feeds to display");
    assert!(matches!(err.downcast_ref::<RunError>(), Some(RunError::NoFeeds)));
}

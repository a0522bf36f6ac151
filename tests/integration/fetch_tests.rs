//! HTTP fetching through the dispatcher: retries, robots.txt, readiness

use paddock::config::{CrawlerConfig, ThrottleConfig, UserAgentConfig};
use paddock::crawler::{Dispatcher, Frontier, Outcome, TaskFailure};
use paddock::extract::{ExtractError, Extraction, Extractor};
use paddock::fetch::{
    build_http_client, FetchError, FetchKind, FetchRequest, Fetcher, HttpFetcher, ReadyCondition,
    RobotsCache,
};
use paddock::state::{FetchTask, Fields, Record, TaskState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Emits the whole body as a single record
struct BodyExtractor;

impl Extractor for BodyExtractor {
    fn extract(&self, content: &str, _task: &FetchTask) -> Result<Extraction, ExtractError> {
        let mut fields = Fields::new();
        fields.insert("body", content);
        Ok(Extraction {
            records: vec![Record::new("pages.csv", fields)],
            next_link: None,
        })
    }
}

fn crawler_config(retry_times: u32, robots_obey: bool) -> CrawlerConfig {
    CrawlerConfig {
        fetch_timeout: 5,
        retry_times,
        retry_backoff: 1,
        retry_backoff_max: 10,
        download_delay: 0,
        randomize_delay: false,
        robots_obey,
        ..CrawlerConfig::default()
    }
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(build_http_client().unwrap(), &UserAgentConfig::default())
}

fn dispatcher(crawler: &CrawlerConfig) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(Arc::new(fetcher()), crawler, &ThrottleConfig::default());
    dispatcher.register("pages", FetchKind::Static, Arc::new(BodyExtractor));
    dispatcher
}

fn task(url: String) -> FetchTask {
    let mut frontier = Frontier::new();
    frontier.ingest_seeds("pages", &[url]).unwrap().remove(0)
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/race/1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/race/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let completion = dispatcher(&crawler_config(2, false))
        .run_task(task(format!("{}/race/1", server.uri())))
        .await;

    assert_eq!(completion.state, TaskState::Emitted);
    assert_eq!(completion.task.retry_count, 1);
    match completion.outcome {
        Outcome::Succeeded { records, .. } => assert_eq!(records[0].fields.get("body"), Some("ok")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/race/1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let completion = dispatcher(&crawler_config(2, false))
        .run_task(task(format!("{}/race/1", server.uri())))
        .await;

    assert_eq!(completion.state, TaskState::FetchFailed);
    assert_eq!(completion.task.retry_count, 2);
    assert_eq!(
        completion.outcome,
        Outcome::Failed(TaskFailure::Fetch(FetchError::Status(500)))
    );
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/horse/0000000000/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let completion = dispatcher(&crawler_config(3, false))
        .run_task(task(format!("{}/horse/0000000000/", server.uri())))
        .await;

    assert_eq!(completion.state, TaskState::FetchFailed);
    assert_eq!(completion.task.retry_count, 0);
}

#[tokio::test]
async fn test_robots_disallow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("public"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&crawler_config(3, true));

    let denied = dispatcher
        .run_task(task(format!("{}/private/1", server.uri())))
        .await;
    assert_eq!(
        denied.outcome,
        Outcome::Failed(TaskFailure::Fetch(FetchError::RobotsDenied))
    );
    // Denials are permanent
    assert_eq!(denied.task.retry_count, 0);

    let allowed = dispatcher
        .run_task(task(format!("{}/public/1", server.uri())))
        .await;
    assert_eq!(allowed.state, TaskState::Emitted);
}

#[tokio::test]
async fn test_slow_robots_only_delays_its_own_host() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /private")
                .set_delay(Duration::from_millis(800)),
        )
        .expect(1)
        .mount(&slow)
        .await;
    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .expect(1)
        .mount(&fast)
        .await;

    let cache = Arc::new(RobotsCache::new(build_http_client().unwrap()));
    let slow_check = {
        let cache = cache.clone();
        let url = Url::parse(&format!("{}/private/1", slow.uri())).unwrap();
        tokio::spawn(async move { cache.is_allowed(&url, "paddock").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let url = Url::parse(&format!("{}/race/1", fast.uri())).unwrap();
    assert!(cache.is_allowed(&url, "paddock").await);
    assert!(started.elapsed() < Duration::from_millis(500));

    assert!(!slow_check.await.unwrap());
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let completion = dispatcher(&crawler_config(0, true))
        .run_task(task(format!("{}/page", server.uri())))
        .await;
    assert_eq!(completion.state, TaskState::Emitted);
}

#[tokio::test]
async fn test_request_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let config = UserAgentConfig {
        agents: vec!["Mozilla/5.0 (test)".to_string()],
        accept_languages: vec!["ja,en;q=0.8".to_string()],
    };
    let fetcher = HttpFetcher::new(build_http_client().unwrap(), &config);
    let request = FetchRequest {
        url: Url::parse(&format!("{}/page", server.uri())).unwrap(),
        kind: FetchKind::Static,
        timeout: Duration::from_secs(5),
        obey_robots: false,
    };

    assert_eq!(fetcher.fetch(&request).await.unwrap(), "hello");
}

#[tokio::test]
async fn test_rendered_page_ready_condition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/odds"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><table id="odds_tan"><tr><td>2.4</td></tr></table></body></html>"#),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let url = Url::parse(&format!("{}/odds", server.uri())).unwrap();
    let request = |locator: &str| FetchRequest {
        url: url.clone(),
        kind: FetchKind::Rendered {
            wait_for: Some(ReadyCondition {
                locator: locator.to_string(),
                timeout: Duration::from_millis(100),
            }),
        },
        timeout: Duration::from_secs(5),
        obey_robots: false,
    };

    assert!(fetcher.fetch(&request("#odds_tan td")).await.is_ok());
    assert!(matches!(
        fetcher.fetch(&request("#odds_fuku")).await,
        Err(FetchError::NotReady { .. })
    ));
}

//! End-to-end crawls: identifier file in, CSV stores out

use paddock::config::{Config, CrawlerConfig, FieldRule, JobConfig, OutputConfig, RecordRule};
use paddock::crawler::{run_crawl, IngestError};
use paddock::PaddockError;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RACE_IDS: [&str; 3] = ["202405021011", "202405021012", "202406050811"];

fn race_page(race_id: &str, horses: &[(&str, &str)]) -> String {
    let rows: String = horses
        .iter()
        .map(|(rank, horse)| {
            format!(
                r#"<tr><td class="rank">{}</td><td class="horse"><a href="/horse/{}/">Horse</a></td></tr>"#,
                rank, horse
            )
        })
        .collect();
    format!(
        r#"<html><body><h1>Race {}</h1>
        <table class="result"><tr><th>着順</th><th>馬名</th></tr>{}</table>
        </body></html>"#,
        race_id, rows
    )
}

fn crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        fetch_timeout: 5,
        retry_times: 0,
        download_delay: 0,
        randomize_delay: false,
        ..CrawlerConfig::default()
    }
}

fn race_job(base_url: &str, ids_file: &Path) -> JobConfig {
    JobConfig {
        name: "race_result".to_string(),
        url_template: Some(format!("{}/race/{{id}}/", base_url)),
        ids_file: Some(ids_file.to_path_buf()),
        id_digits: 12,
        records: vec![RecordRule {
            destination: "race_result.csv".to_string(),
            rows: Some("table.result tr".to_string()),
            fields: vec![
                FieldRule {
                    name: "race_id".to_string(),
                    context: Some("id".to_string()),
                    ..FieldRule::default()
                },
                FieldRule {
                    name: "rank".to_string(),
                    select: Some("td.rank".to_string()),
                    ..FieldRule::default()
                },
                FieldRule {
                    name: "horse_id".to_string(),
                    select: Some("td.horse a".to_string()),
                    attr: Some("href".to_string()),
                    digits: true,
                    ..FieldRule::default()
                },
            ],
        }],
        ..JobConfig::default()
    }
}

fn config(dir: &TempDir, jobs: Vec<JobConfig>, overwrite: bool) -> Config {
    Config {
        crawler: crawler_config(),
        output: OutputConfig {
            base_dir: dir.path().join("out"),
            overwrite,
            ..OutputConfig::default()
        },
        jobs,
        ..Config::default()
    }
}

fn write_ids(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("race_ids.csv");
    std::fs::write(&path, content).unwrap();
    path
}

async fn mount_race(server: &MockServer, race_id: &str, horses: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(format!("/race/{}/", race_id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(race_page(race_id, horses)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_from_identifier_file() {
    let server = MockServer::start().await;
    mount_race(&server, RACE_IDS[0], &[("1", "2021105898"), ("2", "2021104455")]).await;
    mount_race(&server, RACE_IDS[1], &[("1", "2020103301")]).await;
    mount_race(&server, RACE_IDS[2], &[("1", "2021105898")]).await;

    let dir = TempDir::new().unwrap();
    // Header row, a duplicate and a blank line
    let ids = write_ids(
        &dir,
        &format!("race_id\n{}\n{}\n\n{}\n{}\n", RACE_IDS[0], RACE_IDS[1], RACE_IDS[0], RACE_IDS[2]),
    );
    let config = config(&dir, vec![race_job(&server.uri(), &ids)], true);

    let summary = run_crawl(config, &[], CancellationToken::new()).await.unwrap();

    assert_eq!(summary.completed(), 3);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.destinations, vec![("race_result.csv".to_string(), 4)]);

    let content = std::fs::read_to_string(dir.path().join("out/race_result.csv")).unwrap();
    assert_eq!(
        content,
        "race_id,rank,horse_id\n\
         202405021011,1,2021105898\n\
         202405021011,2,2021104455\n\
         202405021012,1,2020103301\n\
         202406050811,1,2021105898\n"
    );
}

#[tokio::test]
async fn test_failed_page_does_not_stop_batch() {
    let server = MockServer::start().await;
    mount_race(&server, RACE_IDS[0], &[("1", "2021105898")]).await;
    Mock::given(method("GET"))
        .and(path(format!("/race/{}/", RACE_IDS[1])))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_race(&server, RACE_IDS[2], &[("1", "2019104975")]).await;

    let dir = TempDir::new().unwrap();
    let ids = write_ids(&dir, &RACE_IDS.join("\n"));
    let config = config(&dir, vec![race_job(&server.uri(), &ids)], true);

    let summary = run_crawl(config, &[], CancellationToken::new()).await.unwrap();

    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].label, RACE_IDS[1]);
    assert!(summary.failures[0].error.contains("404"));

    let content = std::fs::read_to_string(dir.path().join("out/race_result.csv")).unwrap();
    assert_eq!(
        content,
        "race_id,rank,horse_id\n202405021011,1,2021105898\n202406050811,1,2019104975\n"
    );
}

#[tokio::test]
async fn test_malformed_identifier_is_fatal_before_any_fetch() {
    let server = MockServer::start().await;
    mount_race(&server, RACE_IDS[0], &[("1", "2021105898")]).await;

    let dir = TempDir::new().unwrap();
    let ids = write_ids(&dir, &format!("{}\n2024050210\n", RACE_IDS[0]));
    let config = config(&dir, vec![race_job(&server.uri(), &ids)], true);

    let err = run_crawl(config, &[], CancellationToken::new()).await.unwrap_err();

    match err {
        PaddockError::Ingest(IngestError::MalformedRow { row, value, .. }) => {
            assert_eq!(row, 2);
            assert_eq!(value, "2024050210");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(!dir.path().join("out/race_result.csv").exists());
}

#[tokio::test]
async fn test_append_keeps_existing_rows() {
    let server = MockServer::start().await;
    mount_race(&server, RACE_IDS[2], &[("1", "2019104975")]).await;

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(
        out.join("race_result.csv"),
        "race_id,rank,horse_id\n202405021011,1,2021105898\n",
    )
    .unwrap();

    let ids = write_ids(&dir, RACE_IDS[2]);
    let config = config(&dir, vec![race_job(&server.uri(), &ids)], false);

    run_crawl(config, &[], CancellationToken::new()).await.unwrap();

    let content = std::fs::read_to_string(out.join("race_result.csv")).unwrap();
    assert_eq!(
        content,
        "race_id,rank,horse_id\n202405021011,1,2021105898\n202406050811,1,2019104975\n"
    );
}

#[tokio::test]
async fn test_pagination_chain() {
    let server = MockServer::start().await;
    let base = server.uri();
    for (page, next) in [(1, Some(2)), (2, Some(3)), (3, None)] {
        let link = next
            .map(|n| format!(r#"<a class="next" href="/list/{}">次</a>"#, n))
            .unwrap_or_default();
        Mock::given(method("GET"))
            .and(path(format!("/list/{}", page)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><body><h1>Page {}</h1>{}</body></html>",
                page, link
            )))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let job = JobConfig {
        name: "race_list".to_string(),
        start_urls: vec![format!("{}/list/1", base)],
        next: Some("a.next".to_string()),
        records: vec![RecordRule {
            destination: "race_list.csv".to_string(),
            rows: None,
            fields: vec![FieldRule {
                name: "title".to_string(),
                select: Some("h1".to_string()),
                ..FieldRule::default()
            }],
        }],
        ..JobConfig::default()
    };

    let summary = run_crawl(config(&dir, vec![job], true), &[], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 3);
    assert_eq!(summary.progress.total, 3);
    let content = std::fs::read_to_string(dir.path().join("out/race_list.csv")).unwrap();
    assert_eq!(content, "title\nPage 1\nPage 2\nPage 3\n");
}

#[tokio::test]
async fn test_job_filter() {
    let server = MockServer::start().await;
    mount_race(&server, RACE_IDS[0], &[("1", "2021105898")]).await;

    let dir = TempDir::new().unwrap();
    let ids = write_ids(&dir, RACE_IDS[0]);
    let other = JobConfig {
        name: "horse_info".to_string(),
        start_urls: vec![format!("{}/horse/2021105898/", server.uri())],
        ..JobConfig::default()
    };
    let config = config(&dir, vec![race_job(&server.uri(), &ids), other], true);

    let summary = run_crawl(config.clone(), &["race_result".to_string()], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.progress.total, 1);

    let err = run_crawl(config, &["owner".to_string()], CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PaddockError::UnknownJob(name) if name == "owner"));
}

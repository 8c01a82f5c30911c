//! Integration tests for the harvester
//!
//! These tests use wiremock to serve community member pages and drive the
//! full fetch/merge/checkpoint cycle through the real HTTP transport.

use ripple_harvest::adapter::CommunityMembersAdapter;
use ripple_harvest::config::{Credentials, SessionConfig};
use ripple_harvest::harvest::{
    build_http_client, BackoffPolicy, PageFetcher, RateLimitController, RecordingSleeper,
    ReqwestTransport,
};
use ripple_harvest::storage::{
    count_records, CheckpointStore, DuplicatePolicy, JsonCheckpointStore, ResponseArchive,
};
use ripple_harvest::{HarvestError, HarvestOptions, HarvestOutcome, Harvester};
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const MEMBERS_PATH: &str = "/i/api/graphql/V7OdnMvujMPsCctT_daznQ/membersSliceTimeline_Query";
const INFO_PATH: &str = "/i/api/graphql/yl50sLRZmPfKAvxW7H_z0g/CommunitiesFetchOneQuery";

/// Matches member requests by the cursor inside the `variables` parameter
struct CursorIs(Option<&'static str>);

impl Match for CursorIs {
    fn matches(&self, request: &Request) -> bool {
        request
            .url
            .query_pairs()
            .find(|(name, _)| name == "variables")
            .and_then(|(_, value)| serde_json::from_str::<Value>(&value).ok())
            .map(|variables| variables.get("cursor").and_then(Value::as_str) == self.0)
            .unwrap_or(false)
    }
}

fn member(id: &str) -> Value {
    json!({
        "result": {
            "__typename": "User",
            "rest_id": id,
            "is_blue_verified": false,
            "community_role": "Member",
            "legacy": {
                "screen_name": format!("user{}", id),
                "name": format!("User {}", id),
                "protected": false,
                "verified": false,
                "profile_image_url_https": "https://pbs.example/img.jpg",
                "followers_count": 1,
                "friends_count": 2,
                "statuses_count": 3,
                "location": "",
                "created_at": "Mon Jan 01 00:00:00 +0000 2020"
            }
        }
    })
}

fn page_body(ids: &[&str], next_cursor: Option<&str>) -> String {
    json!({
        "data": {
            "communityResults": {
                "result": {
                    "members_slice": {
                        "items_results": ids.iter().map(|id| member(id)).collect::<Vec<_>>(),
                        "slice_info": { "next_cursor": next_cursor }
                    }
                }
            }
        }
    })
    .to_string()
}

async fn mount_page(
    server: &MockServer,
    cursor: Option<&'static str>,
    ids: &[&str],
    next: Option<&str>,
) {
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .and(CursorIs(cursor))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(ids, next)))
        .mount(server)
        .await;
}

/// Three pages of two members each: 1,2 -> 3,4 -> 5,6
async fn mount_three_pages(server: &MockServer) {
    mount_page(server, None, &["1", "2"], Some("c1")).await;
    mount_page(server, Some("c1"), &["3", "4"], Some("c2")).await;
    mount_page(server, Some("c2"), &["5", "6"], None).await;
}

fn options() -> HarvestOptions {
    HarvestOptions {
        fetch_info: false,
        page_delay: Duration::ZERO,
        ..HarvestOptions::default()
    }
}

fn records_path(dir: &TempDir) -> PathBuf {
    dir.path().join("members.csv")
}

fn build_harvester(
    server: &MockServer,
    dir: &TempDir,
    sleeper: &RecordingSleeper,
    options: HarvestOptions,
) -> Harvester {
    let adapter = CommunityMembersAdapter::new(&server.uri(), "1500");
    let client = build_http_client(&SessionConfig::default()).unwrap();
    let transport = ReqwestTransport::new(client, Credentials::new("bearer", "auth", "csrf"));
    let archive = ResponseArchive::new(dir.path().join("logs")).unwrap();
    let policy = BackoffPolicy {
        max_network_attempts: 2,
        network_base_delay: Duration::from_secs(1),
        network_max_delay: Duration::from_secs(4),
        ..BackoffPolicy::default()
    };
    let controller = RateLimitController::new(
        PageFetcher::new(Arc::new(transport), archive),
        policy,
        Arc::new(sleeper.clone()),
    );

    Harvester::new(
        Box::new(adapter),
        controller,
        Box::new(JsonCheckpointStore::new()),
        records_path(dir),
        DuplicatePolicy::FirstWriteWins,
        options,
    )
}

fn ids_on_disk(path: &Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|row| row.unwrap()[0].to_string())
        .collect()
}

#[tokio::test]
async fn test_full_harvest_three_pages() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let report = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.records_added, 6);
    assert_eq!(ids_on_disk(&records_path(&dir)), vec!["1", "2", "3", "4", "5", "6"]);

    let checkpoint = JsonCheckpointStore::new()
        .load(&records_path(&dir))
        .unwrap()
        .unwrap();
    assert!(checkpoint.is_exhausted());
    assert_eq!(checkpoint.collection, "community:1500");
    assert_eq!(checkpoint.pages_fetched, 3);
    assert_eq!(checkpoint.new_records, 6);

    // One archived response per page
    assert_eq!(std::fs::read_dir(dir.path().join("logs")).unwrap().count(), 3);
}

#[tokio::test]
async fn test_resume_after_exhaustion_fetches_nothing() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();
    let requests_after_first = server.received_requests().await.unwrap().len();

    let resumed = HarvestOptions {
        resume: true,
        ..options()
    };
    let report = build_harvester(&server, &dir, &sleeper, resumed)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::AlreadyExhausted);
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(report.records_added, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), requests_after_first);
    assert_eq!(count_records(&records_path(&dir)).unwrap(), 6);
}

#[tokio::test]
async fn test_fresh_rerun_adds_no_duplicates() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();
    let report = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.existing_records, 6);
    assert_eq!(report.records_added, 0);
    assert_eq!(report.duplicates, 6);
    assert_eq!(count_records(&records_path(&dir)).unwrap(), 6);
}

#[tokio::test]
async fn test_overlapping_pages_are_deduplicated() {
    let server = MockServer::start().await;
    mount_page(&server, None, &["1", "2"], Some("c1")).await;
    mount_page(&server, Some("c1"), &["2", "3"], None).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let report = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.records_fetched, 4);
    assert_eq!(report.records_added, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(ids_on_disk(&records_path(&dir)), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_limit_then_resume_continues_from_saved_cursor() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let limited = HarvestOptions {
        limit: Some(2),
        ..options()
    };
    let first = build_harvester(&server, &dir, &sleeper, limited)
        .run()
        .await
        .unwrap();

    assert_eq!(first.outcome, HarvestOutcome::LimitReached);
    assert_eq!(first.pages_fetched, 1);
    assert_eq!(first.final_cursor.as_deref(), Some("c1"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let resumed = HarvestOptions {
        resume: true,
        ..options()
    };
    let second = build_harvester(&server, &dir, &sleeper, resumed)
        .run()
        .await
        .unwrap();

    assert_eq!(second.outcome, HarvestOutcome::Completed);
    assert_eq!(second.pages_fetched, 2);
    assert_eq!(second.records_added, 4);
    // The first page was never requested again
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(ids_on_disk(&records_path(&dir)), vec!["1", "2", "3", "4", "5", "6"]);

    let checkpoint = JsonCheckpointStore::new()
        .load(&records_path(&dir))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.pages_fetched, 3);
    assert!(checkpoint.is_exhausted());
}

#[tokio::test]
async fn test_rate_limit_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .and(CursorIs(None))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, None, &["1", "2"], None).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let report = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.rate_limit_hits, 1);
    assert_eq!(report.records_added, 2);
    assert!(sleeper
        .waits()
        .iter()
        .any(|wait| *wait >= Duration::from_secs(5)));

    let checkpoint = JsonCheckpointStore::new()
        .load(&records_path(&dir))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.rate_limit_hits, 1);
}

#[tokio::test]
async fn test_auth_failure_keeps_previous_progress() {
    let server = MockServer::start().await;
    mount_page(&server, None, &["1", "2"], Some("c1")).await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .and(CursorIs(Some("c1")))
        .respond_with(ResponseTemplate::new(401).set_body_string("Could not authenticate you"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let err = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::AuthFailure { status: 401, .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(count_records(&records_path(&dir)).unwrap(), 2);

    let checkpoint = JsonCheckpointStore::new()
        .load(&records_path(&dir))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.cursor.as_deref(), Some("c1"));
    assert_eq!(checkpoint.pages_fetched, 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let err = build_harvester(&server, &dir, &sleeper, options())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::RetriesExhausted { attempts: 2, .. }));
    assert!(err.is_resumable());
    assert_eq!(err.exit_code(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(count_records(&records_path(&dir)).unwrap(), 0);
}

#[tokio::test]
async fn test_torn_row_is_repaired_before_resume() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let limited = HarvestOptions {
        limit: Some(2),
        ..options()
    };
    build_harvester(&server, &dir, &sleeper, limited)
        .run()
        .await
        .unwrap();

    // Simulate a crash in the middle of appending the next row
    let mut file = OpenOptions::new()
        .append(true)
        .open(records_path(&dir))
        .unwrap();
    file.write_all(b"3,user3,Us").unwrap();
    drop(file);

    let resumed = HarvestOptions {
        resume: true,
        ..options()
    };
    let report = build_harvester(&server, &dir, &sleeper, resumed)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.existing_records, 2);
    assert_eq!(ids_on_disk(&records_path(&dir)), vec!["1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn test_member_count_from_info_request() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    Mock::given(method("GET"))
        .and(path(INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            json!({
                "data": {"communityResults": {"result": {"name": "Rustaceans", "member_count": 6}}}
            })
            .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let with_info = HarvestOptions {
        fetch_info: true,
        ..options()
    };
    let report = build_harvester(&server, &dir, &sleeper, with_info)
        .run()
        .await
        .unwrap();

    assert_eq!(report.target_total, Some(6));
    assert_eq!(report.completion_ratio(), Some(1.0));
}

#[tokio::test]
async fn test_failed_info_request_is_not_fatal() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    Mock::given(method("GET"))
        .and(path(INFO_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::new();

    let with_info = HarvestOptions {
        fetch_info: true,
        ..options()
    };
    let report = build_harvester(&server, &dir, &sleeper, with_info)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.target_total, None);
    assert_eq!(report.records_added, 6);
}

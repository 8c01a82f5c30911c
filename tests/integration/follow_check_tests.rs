//! Follow check against a mock API server
//!
//! Harvests a community into a records file, then checks which of the
//! harvested members follow a target account.

use ripple_harvest::adapter::{CommunityMembersAdapter, SalvagePolicy};
use ripple_harvest::config::{Credentials, SessionConfig};
use ripple_harvest::harvest::{
    build_http_client, BackoffPolicy, FollowCheckOptions, FollowCheckOutput, FollowChecker,
    PageFetcher, RateLimitController, RecordingSleeper, ReqwestTransport,
};
use ripple_harvest::storage::{DuplicatePolicy, JsonCheckpointStore, ResponseArchive};
use ripple_harvest::{HarvestOptions, HarvestOutcome, Harvester};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const MEMBERS_PATH: &str = "/i/api/graphql/V7OdnMvujMPsCctT_daznQ/membersSliceTimeline_Query";
const FOLLOWING_PATH: &str = "/i/api/graphql/zx6e-TLzRkeDO_a7p4b3JQ/Following";

/// Matches following-list requests by the `userId` inside `variables`
struct UserIs(&'static str);

impl Match for UserIs {
    fn matches(&self, request: &Request) -> bool {
        request
            .url
            .query_pairs()
            .find(|(name, _)| name == "variables")
            .and_then(|(_, value)| serde_json::from_str::<Value>(&value).ok())
            .map(|variables| variables.get("userId").and_then(Value::as_str) == Some(self.0))
            .unwrap_or(false)
    }
}

fn controller(dir: &TempDir) -> RateLimitController {
    let client = build_http_client(&SessionConfig::default()).unwrap();
    let transport = ReqwestTransport::new(client, Credentials::new("bearer", "auth", "csrf"));
    let archive = ResponseArchive::new(dir.path().join("logs")).unwrap();
    RateLimitController::new(
        PageFetcher::new(Arc::new(transport), archive),
        BackoffPolicy::default(),
        Arc::new(RecordingSleeper::new()),
    )
}

fn check_options(target: &str) -> FollowCheckOptions {
    FollowCheckOptions {
        target: target.to_string(),
        page_size: 100,
        max_pages: None,
        limit: None,
        delay: Duration::ZERO,
        salvage: SalvagePolicy::FailPage,
    }
}

fn member(id: &str, screen_name: &str, protected: bool) -> Value {
    json!({
        "result": {
            "__typename": "User",
            "rest_id": id,
            "legacy": {"screen_name": screen_name, "protected": protected}
        }
    })
}

fn following_body(screen_names: &[&str]) -> String {
    let entries: Vec<Value> = screen_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "entryId": format!("user-{}", i),
                "content": {"itemContent": {
                    "itemType": "TimelineUser",
                    "user_results": {"result": {
                        "__typename": "User",
                        "rest_id": format!("9{}", i),
                        "legacy": {"screen_name": name}
                    }}
                }}
            })
        })
        .collect();
    json!({
        "data": {"user": {"result": {"timeline": {"timeline": {"instructions": [
            {"type": "TimelineAddEntries", "entries": entries}
        ]}}}}}
    })
    .to_string()
}

async fn mount_following(server: &MockServer, user: &'static str, screen_names: &[&str]) {
    Mock::given(method("GET"))
        .and(path(FOLLOWING_PATH))
        .and(UserIs(user))
        .respond_with(ResponseTemplate::new(200).set_body_string(following_body(screen_names)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_check_harvested_members() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let members_path = dir.path().join("members.csv");

    let members_page = json!({
        "data": {"communityResults": {"result": {"members_slice": {
            "items_results": [
                member("1", "alice", false),
                member("2", "bob", false),
                member("3", "carol", true)
            ],
            "slice_info": {}
        }}}}
    });
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(members_page.to_string()))
        .mount(&server)
        .await;
    mount_following(&server, "1", &["someone", "RustLang"]).await;
    mount_following(&server, "2", &["someone"]).await;

    let mut harvester = Harvester::new(
        Box::new(CommunityMembersAdapter::new(&server.uri(), "1500")),
        controller(&dir),
        Box::new(JsonCheckpointStore::new()),
        &members_path,
        DuplicatePolicy::FirstWriteWins,
        HarvestOptions {
            fetch_info: false,
            page_delay: Duration::ZERO,
            ..HarvestOptions::default()
        },
    );
    let harvest = harvester.run().await.unwrap();
    assert_eq!(harvest.records_added, 3);

    let output = FollowCheckOutput::for_members(&members_path, "rustlang", None, false);
    let checker = FollowChecker::new(
        controller(&dir),
        &server.uri(),
        &members_path,
        output,
        check_options("rustlang"),
    );
    let report = checker.run().await.unwrap();

    assert_eq!(report.outcome, HarvestOutcome::Completed);
    assert_eq!(report.checked, 3);
    assert_eq!(report.followers, 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("members_follows_rustlang.csv")).unwrap(),
        "id,username,follows_target\n1,alice,Yes\n2,bob,No\n3,carol,Unknown (Protected)\n"
    );

    // Everything is answered, so a second run sends no requests
    let before = server.received_requests().await.unwrap().len();
    let again = FollowChecker::new(
        controller(&dir),
        &server.uri(),
        &members_path,
        FollowCheckOutput::for_members(&members_path, "rustlang", None, false),
        check_options("rustlang"),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(again.already_checked, 3);
    assert_eq!(again.checked, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

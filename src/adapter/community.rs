//! Community member listing
//!
//! Pages through `membersSliceTimeline_Query`; the member count comes from a
//! separate `CommunitiesFetchOneQuery` call.

use crate::adapter::{
    collect_entries, count_field, flag_field, parse_api_body, text_field, Adapter, ParseError,
    ParsedPage, RequestDescriptor, SalvagePolicy,
};
use crate::storage::Record;
use serde_json::{json, Value};

const MEMBERS_QUERY: &str = "/i/api/graphql/V7OdnMvujMPsCctT_daznQ/membersSliceTimeline_Query";
const INFO_QUERY: &str = "/i/api/graphql/yl50sLRZmPfKAvxW7H_z0g/CommunitiesFetchOneQuery";

const COLUMNS: &[&str] = &[
    "id",
    "username",
    "name",
    "protected",
    "verified",
    "is_blue_verified",
    "profile_image_url",
    "community_role",
    "followers_count",
    "following_count",
    "statuses_count",
    "location",
    "created_at",
];

/// Adapter for the members of one community
#[derive(Debug, Clone)]
pub struct CommunityMembersAdapter {
    base_url: String,
    community_id: String,
    salvage: SalvagePolicy,
}

impl CommunityMembersAdapter {
    pub fn new(base_url: &str, community_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            community_id: community_id.to_string(),
            salvage: SalvagePolicy::FailPage,
        }
    }

    pub fn with_salvage(mut self, salvage: SalvagePolicy) -> Self {
        self.salvage = salvage;
        self
    }

    fn referer(&self) -> String {
        format!("{}/i/communities/{}/members", self.base_url, self.community_id)
    }
}

/// Turns one `items_results` entry into a member row
fn member_from_item(item: &Value) -> Result<Option<Record>, String> {
    let result = item
        .get("result")
        .ok_or_else(|| "item without result".to_string())?;

    // Suspended or unavailable accounts come back with another typename
    if result.get("__typename").and_then(Value::as_str) != Some("User") {
        return Ok(None);
    }

    let id = result
        .get("rest_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "user without rest_id".to_string())?;
    let legacy = result
        .get("legacy")
        .ok_or_else(|| format!("user {} without legacy profile", id))?;

    let fields = vec![
        id.to_string(),
        text_field(legacy, "screen_name"),
        text_field(legacy, "name"),
        flag_field(legacy, "protected"),
        flag_field(legacy, "verified"),
        flag_field(result, "is_blue_verified"),
        text_field(legacy, "profile_image_url_https"),
        text_field(result, "community_role"),
        count_field(legacy, "followers_count"),
        count_field(legacy, "friends_count"),
        count_field(legacy, "statuses_count"),
        text_field(legacy, "location"),
        text_field(legacy, "created_at"),
    ];

    Ok(Some(Record::new(id, fields)))
}

impl Adapter for CommunityMembersAdapter {
    fn label(&self) -> String {
        format!("community:{}", self.community_id)
    }

    fn archive_prefix(&self) -> &str {
        "community_response"
    }

    fn columns(&self) -> &[&'static str] {
        COLUMNS
    }

    fn key_column(&self) -> usize {
        0
    }

    fn build_request(&self, cursor: Option<&str>, _limit: Option<u64>) -> RequestDescriptor {
        // The slice size is fixed server-side; `limit` cannot shrink it
        let variables = json!({
            "communityId": self.community_id,
            "cursor": cursor,
        });
        let features = json!({
            "responsive_web_graphql_timeline_navigation_enabled": true,
        });

        RequestDescriptor::get(format!("{}{}", self.base_url, MEMBERS_QUERY))
            .with_query("variables", variables.to_string())
            .with_query("features", features.to_string())
            .with_header("referer", self.referer())
    }

    fn parse_response(&self, body: &str) -> Result<ParsedPage, ParseError> {
        let value = parse_api_body(body)?;

        let slice = value
            .pointer("/data/communityResults/result/members_slice")
            .ok_or_else(|| ParseError::Malformed("response has no members_slice".to_string()))?;
        let items = slice
            .get("items_results")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::Malformed("members_slice has no items_results".to_string()))?;

        let (records, skipped) = collect_entries(self.salvage, items.iter().map(member_from_item))?;

        let next_cursor = slice
            .pointer("/slice_info/next_cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(ParsedPage {
            records,
            next_cursor,
            total_count: None,
            skipped,
        })
    }

    fn info_request(&self) -> Option<RequestDescriptor> {
        let variables = json!({
            "communityId": self.community_id,
            "withDmMuting": false,
        });
        let features = json!({
            "profile_label_improvements_pcf_label_in_post_enabled": true,
            "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
            "responsive_web_graphql_timeline_navigation_enabled": true,
            "rweb_tipjar_consumption_enabled": true,
            "verified_phone_label_enabled": false,
        });

        Some(
            RequestDescriptor::get(format!("{}{}", self.base_url, INFO_QUERY))
                .with_query("variables", variables.to_string())
                .with_query("features", features.to_string())
                .with_header("referer", self.referer()),
        )
    }

    fn info_archive_prefix(&self) -> &str {
        "community_info"
    }

    fn parse_info(&self, body: &str) -> Result<Option<u64>, ParseError> {
        let value = parse_api_body(body)?;
        let Some(community) = value.pointer("/data/communityResults/result") else {
            return Ok(None);
        };

        let name = community
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown");
        let member_count = community.get("member_count").and_then(Value::as_u64);
        let moderators = community
            .get("moderator_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        tracing::info!(
            "Community: {} (members: {}, moderators: {})",
            name,
            member_count.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
            moderators
        );

        Ok(member_count)
    }

    fn salvage_policy(&self) -> SalvagePolicy {
        self.salvage
    }
}

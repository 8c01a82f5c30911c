//! Following listing of one user
//!
//! The `Following` timeline returns instructions; user entries and the bottom
//! cursor both arrive inside `TimelineAddEntries`.

use crate::adapter::{
    collect_entries, count_field, flag_field, parse_api_body, text_field, Adapter, ParseError,
    ParsedPage, RequestDescriptor, SalvagePolicy,
};
use crate::storage::Record;
use serde_json::{json, Map, Value};

const FOLLOWING_QUERY: &str = "/i/api/graphql/zx6e-TLzRkeDO_a7p4b3JQ/Following";

const COLUMNS: &[&str] = &[
    "id",
    "username",
    "name",
    "protected",
    "verified",
    "is_blue_verified",
    "followers_count",
    "following_count",
];

/// Default number of users requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Adapter for the accounts a user follows
#[derive(Debug, Clone)]
pub struct FollowingAdapter {
    base_url: String,
    user_id: String,
    page_size: u32,
    salvage: SalvagePolicy,
}

impl FollowingAdapter {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            salvage: SalvagePolicy::FailPage,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_salvage(mut self, salvage: SalvagePolicy) -> Self {
        self.salvage = salvage;
        self
    }
}

/// Turns one timeline entry into a user row, `Ok(None)` for non-user entries
fn user_from_entry(entry: &Value) -> Result<Option<Record>, String> {
    let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or_default();
    if !entry_id.contains("user") {
        return Ok(None);
    }

    let Some(content) = entry.pointer("/content/itemContent") else {
        return Err(format!("{}: entry without itemContent", entry_id));
    };
    if content.get("itemType").and_then(Value::as_str) != Some("TimelineUser") {
        return Ok(None);
    }

    let Some(result) = content.pointer("/user_results/result") else {
        return Err(format!("{}: entry without user_results", entry_id));
    };
    if result.get("__typename").and_then(Value::as_str) != Some("User") {
        return Ok(None);
    }

    let id = result
        .get("rest_id")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{}: user without rest_id", entry_id))?;
    let legacy = result
        .get("legacy")
        .ok_or_else(|| format!("{}: user {} without legacy profile", entry_id, id))?;

    let fields = vec![
        id.to_string(),
        text_field(legacy, "screen_name"),
        text_field(legacy, "name"),
        flag_field(legacy, "protected"),
        flag_field(legacy, "verified"),
        flag_field(result, "is_blue_verified"),
        count_field(legacy, "followers_count"),
        count_field(legacy, "friends_count"),
    ];

    Ok(Some(Record::new(id, fields)))
}

fn is_user_entry(entry: &Value) -> bool {
    entry
        .get("entryId")
        .and_then(Value::as_str)
        .map_or(false, |id| id.contains("user"))
}

fn bottom_cursor(entry: &Value) -> Option<String> {
    let entry_id = entry.get("entryId").and_then(Value::as_str)?;
    if !entry_id.starts_with("cursor-bottom") {
        return None;
    }
    entry
        .pointer("/content/value")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

impl Adapter for FollowingAdapter {
    fn label(&self) -> String {
        format!("following:{}", self.user_id)
    }

    fn archive_prefix(&self) -> &str {
        "following_response"
    }

    fn columns(&self) -> &[&'static str] {
        COLUMNS
    }

    fn key_column(&self) -> usize {
        0
    }

    fn build_request(&self, cursor: Option<&str>, limit: Option<u64>) -> RequestDescriptor {
        let count = match limit {
            Some(remaining) => remaining.clamp(1, u64::from(self.page_size)),
            None => u64::from(self.page_size),
        };

        let mut variables = Map::new();
        variables.insert("userId".to_string(), json!(self.user_id));
        variables.insert("count".to_string(), json!(count));
        variables.insert("includePromotedContent".to_string(), json!(false));
        if let Some(cursor) = cursor {
            variables.insert("cursor".to_string(), json!(cursor));
        }
        let features = json!({
            "responsive_web_graphql_timeline_navigation_enabled": true,
            "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
            "verified_phone_label_enabled": false,
        });

        RequestDescriptor::get(format!("{}{}", self.base_url, FOLLOWING_QUERY))
            .with_query("variables", Value::Object(variables).to_string())
            .with_query("features", features.to_string())
            .with_header(
                "referer",
                format!("{}/i/user/{}/following", self.base_url, self.user_id),
            )
    }

    fn parse_response(&self, body: &str) -> Result<ParsedPage, ParseError> {
        let value = parse_api_body(body)?;

        let instructions = value
            .pointer("/data/user/result/timeline/timeline/instructions")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::Malformed("response has no timeline instructions".to_string()))?;

        let entries: Vec<&Value> = instructions
            .iter()
            .filter(|i| i.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
            .filter_map(|i| i.get("entries").and_then(Value::as_array))
            .flatten()
            .collect();

        let (records, skipped) =
            collect_entries(self.salvage, entries.iter().map(|e| user_from_entry(e)))?;

        // The timeline keeps handing out a bottom cursor after the last user.
        // Pages of suspended or unavailable accounts still carry user entries.
        let user_entries = entries.iter().filter(|e| is_user_entry(e)).count();
        let next_cursor = if user_entries == 0 {
            None
        } else {
            entries.iter().find_map(|e| bottom_cursor(e))
        };

        Ok(ParsedPage {
            records,
            next_cursor,
            total_count: None,
            skipped,
        })
    }

    fn salvage_policy(&self) -> SalvagePolicy {
        self.salvage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_entry(id: &str, screen_name: &str) -> Value {
        json!({
            "entryId": format!("user-{}", id),
            "content": {
                "itemContent": {
                    "itemType": "TimelineUser",
                    "user_results": {
                        "result": {
                            "__typename": "User",
                            "rest_id": id,
                            "is_blue_verified": false,
                            "legacy": {
                                "screen_name": screen_name,
                                "name": "Someone",
                                "protected": true,
                                "verified": false,
                                "followers_count": 7,
                                "friends_count": 3
                            }
                        }
                    }
                }
            }
        })
    }

    fn cursor_entry(kind: &str, value: &str) -> Value {
        json!({
            "entryId": format!("cursor-{}-1234", kind),
            "content": {"cursorType": "Bottom", "value": value}
        })
    }

    fn timeline(entries: Vec<Value>) -> String {
        json!({
            "data": {"user": {"result": {"timeline": {"timeline": {"instructions": [
                {"type": "TimelineClearCache"},
                {"type": "TimelineAddEntries", "entries": entries}
            ]}}}}}
        })
        .to_string()
    }

    #[test]
    fn test_build_request_page_size_and_limit() {
        let adapter = FollowingAdapter::new("https://x.com", "42").with_page_size(50);

        let request = adapter.build_request(None, None);
        let variables: Value =
            serde_json::from_str(request.query_param("variables").unwrap()).unwrap();
        assert_eq!(variables["userId"], "42");
        assert_eq!(variables["count"], 50);
        assert!(variables.get("cursor").is_none());

        let request = adapter.build_request(Some("abc"), Some(7));
        let variables: Value =
            serde_json::from_str(request.query_param("variables").unwrap()).unwrap();
        assert_eq!(variables["count"], 7);
        assert_eq!(variables["cursor"], "abc");
    }

    #[test]
    fn test_parse_users_and_bottom_cursor() {
        let adapter = FollowingAdapter::new("https://x.com", "42");
        let body = timeline(vec![
            user_entry("1", "alice"),
            user_entry("2", "bob"),
            cursor_entry("top", "TOP"),
            cursor_entry("bottom", "BOTTOM"),
        ]);

        let parsed = adapter.parse_response(&body).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.next_cursor.as_deref(), Some("BOTTOM"));

        let alice = &parsed.records[0];
        assert_eq!(alice.fields.len(), adapter.columns().len());
        assert_eq!(alice.fields[1], "alice");
        assert_eq!(alice.fields[3], "True");
        assert_eq!(alice.fields[7], "3");
    }

    #[test]
    fn test_page_without_users_ends_collection() {
        let adapter = FollowingAdapter::new("https://x.com", "42");
        let body = timeline(vec![cursor_entry("bottom", "BOTTOM")]);

        let parsed = adapter.parse_response(&body).unwrap();
        assert!(parsed.records.is_empty());
        assert!(parsed.next_cursor.is_none());
    }

    #[test]
    fn test_page_of_unavailable_users_continues() {
        let adapter = FollowingAdapter::new("https://x.com", "42");
        let unavailable = |id: &str| {
            json!({
                "entryId": format!("user-{}", id),
                "content": {"itemContent": {
                    "itemType": "TimelineUser",
                    "user_results": {"result": {"__typename": "UserUnavailable"}}
                }}
            })
        };
        let body = timeline(vec![
            unavailable("1"),
            unavailable("2"),
            cursor_entry("bottom", "NEXT"),
        ]);

        let parsed = adapter.parse_response(&body).unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.next_cursor.as_deref(), Some("NEXT"));
    }

    #[test]
    fn test_missing_instructions_is_malformed() {
        let adapter = FollowingAdapter::new("https://x.com", "42");
        assert!(matches!(
            adapter.parse_response(r#"{"data":{"user":{}}}"#),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_salvage_skips_broken_user() {
        let adapter = FollowingAdapter::new("https://x.com", "42").with_salvage(SalvagePolicy::SkipEntries);
        let broken = json!({"entryId": "user-9", "content": {}});
        let body = timeline(vec![
            user_entry("1", "alice"),
            broken,
            cursor_entry("bottom", "NEXT"),
        ]);

        let parsed = adapter.parse_response(&body).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.next_cursor.as_deref(), Some("NEXT"));
    }
}

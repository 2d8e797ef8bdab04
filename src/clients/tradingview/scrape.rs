use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::outcome::{Holder, TradingViewError};
use crate::constants::limits::MAX_BODY_EXCERPT;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

fn hidden_input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(
        &RE,
        r#"(?i)<input[^>]*name=["']csrfmiddlewaretoken["'][^>]*value=["']([^"']+)["']"#,
    )
}

fn hidden_input_reversed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(
        &RE,
        r#"(?i)<input[^>]*value=["']([^"']+)["'][^>]*name=["']csrfmiddlewaretoken["']"#,
    )
}

fn json_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(&RE, r#"["'](?:csrfToken|csrf_token)["']\s*:\s*["']([^"']+)["']"#)
}

fn meta_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(
        &RE,
        r#"(?i)<meta[^>]*name=["']csrf-token["'][^>]*content=["']([^"']+)["']"#,
    )
}

/// Pulls a CSRF token out of a page, trying the form field, inline JSON and
/// meta tag shapes in that order.
#[must_use]
pub fn extract_csrf_token(body: &str) -> Option<String> {
    [
        hidden_input_regex(),
        hidden_input_reversed_regex(),
        json_token_regex(),
        meta_tag_regex(),
    ]
    .iter()
    .find_map(|re| re.captures(body))
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
}

/// Reads `csrftoken` from a `Cookie` header value (`a=b; c=d`).
#[must_use]
pub fn csrf_from_cookie_header(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "csrftoken" && !value.is_empty()).then(|| value.to_string())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginSignal {
    Rejected(String),
    Accepted,
    /// Not JSON, or JSON without either marker.
    Unknown,
}

#[must_use]
pub fn login_signal(body: &str) -> LoginSignal {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return LoginSignal::Unknown;
    };

    match map.get("error") {
        Some(Value::String(msg)) if !msg.is_empty() => {
            return LoginSignal::Rejected(msg.clone());
        }
        Some(Value::Object(obj)) if !obj.is_empty() => {
            return LoginSignal::Rejected(Value::Object(obj.clone()).to_string());
        }
        _ => {}
    }

    if map.get("user").is_some_and(|u| !u.is_null()) {
        LoginSignal::Accepted
    } else {
        LoginSignal::Unknown
    }
}

/// Positive or negative success marker in a JSON mutation response.
///
/// Looks at `success` (bool), then `status` (`ok`/`success` vs `error`/`fail*`),
/// then a non-empty `error`. `None` when the body carries none of these.
#[must_use]
pub fn json_success_signal(body: &str) -> Option<bool> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    if let Some(Value::Bool(flag)) = map.get("success") {
        return Some(*flag);
    }

    if let Some(Value::String(status)) = map.get("status") {
        let status = status.to_ascii_lowercase();
        if matches!(status.as_str(), "ok" | "success" | "done") {
            return Some(true);
        }
        if status == "error" || status.starts_with("fail") {
            return Some(false);
        }
    }

    match map.get("error") {
        Some(Value::String(msg)) if !msg.is_empty() => Some(false),
        Some(Value::Object(obj)) if !obj.is_empty() => Some(false),
        _ => None,
    }
}

/// Usernames from the hint endpoint. `None` when the body is not a JSON list.
#[must_use]
pub fn usernames_from_hint(body: &str) -> Option<Vec<String>> {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => map.get("username").and_then(Value::as_str),
                Value::String(name) => Some(name.as_str()),
                _ => None,
            })
            .map(str::to_string)
            .collect(),
    )
}

/// One `list_users` page.
#[derive(Debug)]
pub struct HolderPage {
    pub holders: Vec<Holder>,
    /// Items the server sent, including any that did not parse as a holder.
    pub returned: usize,
}

/// Holders from a `list_users` page: either `{"results": [...]}` or a bare list.
/// Any other shape, such as `{"detail": "..."}`, is an error.
pub fn holders_from_json(body: &str) -> Result<HolderPage, TradingViewError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| TradingViewError::Parse(e.to_string()))?;

    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                TradingViewError::Parse(format!(
                    "holder list without results: {}",
                    excerpt(body, MAX_BODY_EXCERPT)
                ))
            })?,
        _ => {
            return Err(TradingViewError::Parse(format!(
                "unexpected holder list: {}",
                excerpt(body, MAX_BODY_EXCERPT)
            )));
        }
    };

    let holders = items
        .iter()
        .filter_map(|item| {
            let username = item.get("username")?.as_str()?.to_string();
            let text = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            Some(Holder {
                username,
                expiration: text("expiration"),
                created: text("created"),
            })
        })
        .collect();

    Ok(HolderPage {
        holders,
        returned: items.len(),
    })
}

/// Profile page markers for an unknown user.
#[must_use]
pub fn profile_missing(body: &str) -> bool {
    body.contains("Page Not Found") || body.contains("User not found")
}

/// Trims a response body for logs and audit details.
#[must_use]
pub fn excerpt(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }

    let mut end = max;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_from_hidden_input() {
        let html = r#"<form><input type="hidden" name="csrfmiddlewaretoken" value="tok123"></form>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("tok123"));

        let reversed = r#"<input value='abc' type='hidden' name='csrfmiddlewaretoken'/>"#;
        assert_eq!(extract_csrf_token(reversed).as_deref(), Some("abc"));
    }

    #[test]
    fn test_csrf_from_inline_json() {
        let html = r#"<script>window.initData = {"csrfToken": "json-tok", "x": 1};</script>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("json-tok"));

        let snake = r#"{"csrf_token":"snake-tok"}"#;
        assert_eq!(extract_csrf_token(snake).as_deref(), Some("snake-tok"));
    }

    #[test]
    fn test_csrf_from_meta_tag() {
        let html = r#"<head><meta name="csrf-token" content="meta-tok"></head>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("meta-tok"));
    }

    #[test]
    fn test_csrf_absent() {
        assert_eq!(extract_csrf_token("<html><body>nothing</body></html>"), None);
    }

    #[test]
    fn test_csrf_from_cookie_header() {
        assert_eq!(
            csrf_from_cookie_header("sessionid=s1; csrftoken=ck; other=x").as_deref(),
            Some("ck")
        );
        assert_eq!(csrf_from_cookie_header("sessionid=s1"), None);
    }

    #[test]
    fn test_login_signal() {
        assert_eq!(
            login_signal(r#"{"error": "Invalid username or password"}"#),
            LoginSignal::Rejected("Invalid username or password".to_string())
        );
        assert_eq!(
            login_signal(r#"{"error": "", "user": {"id": 1}}"#),
            LoginSignal::Accepted
        );
        assert_eq!(login_signal("<html>ok</html>"), LoginSignal::Unknown);
        assert_eq!(login_signal(r#"{"user": null}"#), LoginSignal::Unknown);
    }

    #[test]
    fn test_json_success_signal() {
        assert_eq!(json_success_signal(r#"{"success": true}"#), Some(true));
        assert_eq!(json_success_signal(r#"{"success": false}"#), Some(false));
        assert_eq!(json_success_signal(r#"{"status": "ok"}"#), Some(true));
        assert_eq!(json_success_signal(r#"{"status": "failed"}"#), Some(false));
        assert_eq!(json_success_signal(r#"{"error": "no such user"}"#), Some(false));
        assert_eq!(json_success_signal(r#"{"result": 1}"#), None);
        assert_eq!(json_success_signal("OK"), None);
    }

    #[test]
    fn test_usernames_from_hint() {
        let body = r#"[{"username": "TraderJoe", "id": 1}, {"username": "traderjane"}]"#;
        assert_eq!(
            usernames_from_hint(body),
            Some(vec!["TraderJoe".to_string(), "traderjane".to_string()])
        );
        assert_eq!(usernames_from_hint("<html></html>"), None);
    }

    #[test]
    fn test_holders_from_json() {
        let body = r#"{"results": [
            {"username": "alice", "expiration": "2030-01-01T00:00:00Z", "created": "2024-01-01"},
            {"username": "bob", "expiration": null}
        ], "next": null}"#;
        let page = holders_from_json(body).unwrap();
        assert_eq!(page.returned, 2);
        let holders = page.holders;
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[0].expiration.as_deref(), Some("2030-01-01T00:00:00Z"));
        assert_eq!(holders[1].username, "bob");
        assert!(holders[1].expiration.is_none());

        assert_eq!(holders_from_json(r#"[{"username": "carol"}]"#).unwrap().holders.len(), 1);
        assert!(holders_from_json("not json").is_err());
    }

    #[test]
    fn test_holder_page_counts_unparsed_items() {
        let body = r#"{"results": [{"username": "a"}, {"username": null}, {"username": "c"}]}"#;
        let page = holders_from_json(body).unwrap();
        assert_eq!(page.returned, 3);
        assert_eq!(page.holders.len(), 2);
    }

    #[test]
    fn test_holder_list_error_replies() {
        assert!(matches!(
            holders_from_json(r#"{"detail": "Authentication credentials were not provided."}"#),
            Err(TradingViewError::Parse(_))
        ));
        assert!(matches!(
            holders_from_json(r#"{"results": null}"#),
            Err(TradingViewError::Parse(_))
        ));
        assert!(matches!(holders_from_json("42"), Err(TradingViewError::Parse(_))));
        assert_eq!(holders_from_json(r#"{"results": []}"#).unwrap().returned, 0);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("ééééé", 3), "é...");
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use pinegate::clients::tradingview::{
    AccessStatus, Holder, MutationReport, TradingViewError, UsernameCheck,
};
use pinegate::clients::{PermissionClient, SessionStatus};
use pinegate::config::Config;
use pinegate::domain::Outcome;
use serde_json::{Value, json};
use tower::ServiceExt;

const ADMIN_EMAIL: &str = "admin@localhost";
const ADMIN_PASSWORD: &str = "change-me-now";

/// In-process stand-in for TradingView: a fixed set of accounts and a
/// holder table that grants and removals edit.
struct FakeTradingView {
    accounts: Vec<&'static str>,
    ambiguous_scripts: HashSet<String>,
    holders: Mutex<HashMap<String, Vec<Holder>>>,
}

impl FakeTradingView {
    fn new(accounts: Vec<&'static str>) -> Self {
        Self {
            accounts,
            ambiguous_scripts: HashSet::new(),
            holders: Mutex::new(HashMap::new()),
        }
    }

    fn with_ambiguous(mut self, pine_id: &str) -> Self {
        self.ambiguous_scripts.insert(pine_id.to_string());
        self
    }
}

#[async_trait]
impl PermissionClient for FakeTradingView {
    async fn validate_username(&self, username: &str) -> Result<UsernameCheck, TradingViewError> {
        let found = self
            .accounts
            .iter()
            .find(|account| account.eq_ignore_ascii_case(username));

        Ok(UsernameCheck {
            valid: found.is_some(),
            username: found.map_or_else(|| username.to_string(), |a| (*a).to_string()),
        })
    }

    async fn grant(
        &self,
        username: &str,
        pine_id: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> MutationReport {
        if self.ambiguous_scripts.contains(pine_id) {
            return MutationReport::ambiguous("upstream returned 502");
        }

        let mut holders = self.holders.lock().unwrap();
        let entry = holders.entry(pine_id.to_string()).or_default();
        entry.retain(|h| !h.username.eq_ignore_ascii_case(username));
        entry.push(Holder {
            username: username.to_string(),
            expiration: expiration.map(|e| e.to_rfc3339()),
            created: None,
        });

        MutationReport {
            outcome: Outcome::Success,
            status: Some(200),
            detail: "ok".to_string(),
        }
    }

    async fn remove(&self, username: &str, pine_id: &str) -> MutationReport {
        let mut holders = self.holders.lock().unwrap();
        if let Some(entry) = holders.get_mut(pine_id) {
            entry.retain(|h| !h.username.eq_ignore_ascii_case(username));
        }

        MutationReport {
            outcome: Outcome::Success,
            status: Some(200),
            detail: "ok".to_string(),
        }
    }

    async fn list_holders(&self, pine_id: &str) -> Result<Vec<Holder>, TradingViewError> {
        Ok(self
            .holders
            .lock()
            .unwrap()
            .get(pine_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_access(
        &self,
        username: &str,
        pine_id: &str,
    ) -> Result<AccessStatus, TradingViewError> {
        let holders = self.list_holders(pine_id).await?;
        let holder = holders
            .iter()
            .find(|h| h.username.eq_ignore_ascii_case(username));
        Ok(AccessStatus::from_holder(pine_id, username, holder))
    }

    async fn session_status(&self) -> SessionStatus {
        SessionStatus {
            authenticated: true,
            credentials_configured: true,
            csrf_token_known: true,
            last_login: None,
        }
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.tradingview.call_delay_ms = 0;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.observability.metrics_enabled = false;
    config
}

async fn spawn_app(client: FakeTradingView) -> Router {
    let state =
        pinegate::api::create_app_state_with_client(test_config(), Arc::new(client), None)
            .await
            .expect("Failed to create app state");
    pinegate::api::router(state).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("X-Api-Key", key);
    }

    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["data"]["api_key"].as_str().unwrap().to_string()
}

async fn add_script(app: &Router, admin: &str, pine_id: &str, name: &str) {
    let (status, body) = send(
        app,
        "POST",
        "/api/scripts",
        Some(admin),
        Some(json!({ "pine_id": pine_id, "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "add script failed: {body}");
}

#[tokio::test]
async fn test_auth_gates() {
    let app = spawn_app(FakeTradingView::new(vec![])).await;

    let (status, body) = send(&app, "GET", "/api/system/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], true);

    let (status, body) = send(&app, "GET", "/api/keys", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, "GET", "/api/keys", Some("wrong-key"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": "not-the-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = send(&app, "GET", "/api/system/status", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], "connected");
    assert_eq!(body["data"]["tradingview"]["authenticated"], true);

    let (status, body) = send(&app, "GET", "/api/auth/me", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], ADMIN_EMAIL);
    assert_eq!(body["data"]["is_admin"], true);
}

#[tokio::test]
async fn test_key_register_bind_and_request_access() {
    let app = spawn_app(FakeTradingView::new(vec!["Trader_One"])).await;
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    add_script(&app, &admin, "PUB;alpha", "Alpha").await;
    add_script(&app, &admin, "PUB;beta", "Beta").await;

    let (status, _) = send(
        &app,
        "PUT",
        "/api/scripts/PUB;beta/visibility",
        Some(&admin),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/keys",
        Some(&admin),
        Some(json!({ "count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let keys = body["data"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    let code = keys[0]["code"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/api/keys/validate",
        None,
        Some(json!({ "code": code.to_lowercase() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": "Trader@Example.com",
            "password": "trader-pass-1",
            "access_key": code,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    assert_eq!(body["data"]["email"], "trader@example.com");
    assert_eq!(body["data"]["is_admin"], false);

    let (_, body) = send(
        &app,
        "POST",
        "/api/keys/validate",
        None,
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(body["data"]["valid"], false);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": "second@example.com",
            "password": "second-pass-1",
            "access_key": code,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let trader = login(&app, "trader@example.com", "trader-pass-1").await;

    let (status, _) = send(&app, "GET", "/api/keys", Some(&trader), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "POST", "/api/me/access", Some(&trader), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/me/tradingview",
        Some(&trader),
        Some(json!({ "username": "nobody_here" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/me/tradingview",
        Some(&trader),
        Some(json!({ "username": "trader_one" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tradingview_username"], "Trader_One");

    let (status, body) = send(&app, "GET", "/api/scripts/visible", Some(&trader), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "POST", "/api/me/access", Some(&trader), None).await;
    assert_eq!(status, StatusCode::OK, "request access failed: {body}");
    assert_eq!(body["data"]["succeeded"], 1);
    assert_eq!(body["data"]["results"][0]["pine_id"], "PUB;alpha");

    let (status, body) = send(&app, "GET", "/api/me/access", Some(&trader), None).await;
    assert_eq!(status, StatusCode::OK);
    let grants = body["data"].as_array().unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["pine_id"], "PUB;alpha");
    assert_eq!(grants[0]["tradingview_username"], "Trader_One");

    let (status, _) = send(&app, "POST", "/api/me/access", Some(&trader), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/keys/{code}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["key"]["status"], "used");
    assert!(body["data"]["key"]["bound_user_id"].is_number());
    let logs = body["data"]["logs"].as_array().unwrap();
    assert!(logs.iter().any(|l| l["operation"] == "grant"));

    let (_, body) = send(&app, "GET", "/api/keys/stats", Some(&admin), None).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["used"], 1);
    assert_eq!(body["data"]["active"], 1);
}

#[tokio::test]
async fn test_admin_grant_remove_and_audit() {
    let client = FakeTradingView::new(vec!["someone"]).with_ambiguous("PUB;flaky");
    let app = spawn_app(client).await;
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    add_script(&app, &admin, "PUB;alpha", "Alpha").await;
    add_script(&app, &admin, "PUB;flaky", "Flaky").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/grant-access",
        Some(&admin),
        Some(json!({ "username": "someone", "pine_ids": ["PUB;alpha"], "duration": "bogus" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/api/grant-access",
        Some(&admin),
        Some(json!({ "username": "someone", "pine_ids": ["PUB;alpha"], "duration": "300000Y" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("lifetime"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/grant-access",
        Some(&admin),
        Some(json!({ "username": "someone", "pine_ids": "PUB;alpha, PUB;flaky", "duration": "30D" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "grant failed: {body}");
    assert_eq!(body["data"]["succeeded"], 1);
    assert_eq!(body["data"]["ambiguous"], 1);
    assert_eq!(body["data"]["failed"], 0);

    let (status, body) = send(
        &app,
        "GET",
        "/api/script-users/PUB;alpha",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["users"][0]["username"], "someone");

    let (status, body) = send(
        &app,
        "POST",
        "/api/check-access",
        Some(&admin),
        Some(json!({ "username": "someone", "pine_ids": ["PUB;alpha"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["access"]["has_access"], true);

    let (status, body) = send(
        &app,
        "POST",
        "/api/remove-access",
        Some(&admin),
        Some(json!({ "username": "someone", "pine_ids": ["PUB;alpha"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["succeeded"], 1);

    let (_, body) = send(
        &app,
        "GET",
        "/api/script-users/PUB;alpha",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(body["data"]["count"], 0);

    let (status, body) = send(
        &app,
        "GET",
        "/api/audit?operation=grant",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    let items = body["data"]["items"].as_array().unwrap();
    assert!(items.iter().all(|i| i["actor"] == ADMIN_EMAIL));
    assert!(items.iter().any(|i| i["outcome"] == "ambiguous"));

    let (status, _) = send(&app, "GET", "/api/audit?outcome=maybe", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/audit/summary", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grants_succeeded"], 1);
    assert_eq!(body["data"]["by_operation"]["remove"]["success"], 1);
}

#[tokio::test]
async fn test_script_catalog_conflicts_and_readd() {
    let app = spawn_app(FakeTradingView::new(vec![])).await;
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    add_script(&app, &admin, "PUB;x", "X").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/scripts",
        Some(&admin),
        Some(json!({ "pine_id": "PUB;x", "name": "X again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/scripts/PUB;x/active",
        Some(&admin),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);

    let (status, body) = send(
        &app,
        "POST",
        "/api/scripts",
        Some(&admin),
        Some(json!({ "pine_id": "PUB;x", "name": "X v2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "X v2");
    assert_eq!(body["data"]["is_active"], true);

    let (status, _) = send(&app, "DELETE", "/api/scripts/PUB;x", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "DELETE", "/api/scripts/PUB;x", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/api/scripts", Some(&admin), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

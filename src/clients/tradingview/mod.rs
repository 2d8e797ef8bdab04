//! Browser-session client for TradingView's Pine Script permission endpoints.
//!
//! TradingView has no public API for this. The client logs in like a browser,
//! keeps the cookie jar and CSRF token, and re-logs in when a call bounces to
//! the sign-in page.

pub mod outcome;
pub mod scrape;
pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ORIGIN, REFERER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{SuccessPolicy, TradingViewConfig};
use crate::constants::limits::MAX_BODY_EXCERPT;

pub use outcome::{
    AccessStatus, Holder, MutationReport, TradingViewError, UsernameCheck, classify_mutation,
    classify_transport_error,
};
use scrape::{
    HolderPage, LoginSignal, csrf_from_cookie_header, excerpt, extract_csrf_token, holders_from_json,
    login_signal, profile_missing, usernames_from_hint,
};
use session::{SessionSnapshot, SessionStore};

/// Remote permission operations. Implemented by [`TradingViewClient`] and by
/// fakes in tests.
#[async_trait]
pub trait PermissionClient: Send + Sync {
    async fn validate_username(&self, username: &str) -> Result<UsernameCheck, TradingViewError>;

    async fn grant(
        &self,
        username: &str,
        pine_id: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> MutationReport;

    async fn remove(&self, username: &str, pine_id: &str) -> MutationReport;

    async fn list_holders(&self, pine_id: &str) -> Result<Vec<Holder>, TradingViewError>;

    async fn check_access(
        &self,
        username: &str,
        pine_id: &str,
    ) -> Result<AccessStatus, TradingViewError>;

    async fn session_status(&self) -> SessionStatus;
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub credentials_configured: bool,
    pub csrf_token_known: bool,
    pub last_login: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    authenticated: bool,
    csrf_token: Option<String>,
    last_login: Option<String>,
    /// Bumped on every successful login.
    generation: u64,
}

struct Call {
    method: Method,
    url: Url,
    form: Option<Vec<(&'static str, String)>>,
}

impl Call {
    fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            form: None,
        }
    }

    fn post(url: Url, form: Vec<(&'static str, String)>) -> Self {
        Self {
            method: Method::POST,
            url,
            form: Some(form),
        }
    }
}

struct RemoteResponse {
    status: StatusCode,
    final_url: Url,
    body: String,
}

impl RemoteResponse {
    fn on_signin_page(&self, signin_path: &str) -> bool {
        self.final_url.path().contains(signin_path)
    }

    fn needs_login(&self, signin_path: &str) -> bool {
        matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            || self.on_signin_page(signin_path)
    }

    fn unexpected(&self) -> TradingViewError {
        TradingViewError::UnexpectedStatus {
            status: self.status.as_u16(),
            excerpt: excerpt(&self.body, MAX_BODY_EXCERPT),
        }
    }
}

pub struct TradingViewClient {
    http: Client,
    jar: Arc<Jar>,
    config: TradingViewConfig,
    base_url: Url,
    session_store: SessionStore,
    state: RwLock<SessionState>,
    login_lock: Mutex<()>,
}

impl TradingViewClient {
    /// Builds the client and restores any saved session from disk.
    pub async fn new(config: TradingViewConfig) -> Result<Self, TradingViewError> {
        let base_url = Url::parse(&config.base_url)?;
        let jar = Arc::new(Jar::default());

        let http = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let session_store = SessionStore::new(&config.session_file);
        let mut state = SessionState::default();

        if let Some(snapshot) = session_store.load().await {
            for cookie in &snapshot.cookies {
                jar.add_cookie_str(
                    &format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path),
                    &base_url,
                );
            }
            info!(
                cookies = snapshot.cookies.len(),
                saved_at = ?snapshot.saved_at,
                "Restored TradingView session"
            );
            state.csrf_token = snapshot.csrf_token;
        }

        Ok(Self {
            http,
            jar,
            config,
            base_url,
            session_store,
            state: RwLock::new(state),
            login_lock: Mutex::new(()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TradingViewError> {
        Ok(self.base_url.join(path)?)
    }

    fn cookie_header(&self) -> Option<String> {
        self.jar
            .cookies(&self.base_url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    async fn send(&self, call: &Call) -> Result<RemoteResponse, reqwest::Error> {
        let csrf_token = self.state.read().await.csrf_token.clone();

        let mut request = self
            .http
            .request(call.method.clone(), call.url.clone())
            .header(REFERER, self.config.base_url.as_str())
            .header(ORIGIN, self.base_url.origin().ascii_serialization())
            .header("X-Requested-With", "XMLHttpRequest");

        if let Some(token) = csrf_token {
            request = request.header("X-CSRFToken", token);
        }

        if let Some(form) = &call.form {
            request = request.form(form);
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().clone();
        let body = response.text().await?;

        debug!(method = %call.method, url = %call.url, status = %status, "TradingView call");

        Ok(RemoteResponse {
            status,
            final_url,
            body,
        })
    }

    async fn probe(&self) -> Result<bool, TradingViewError> {
        let url = self.endpoint(&self.config.probe_path)?;
        let response = self.send(&Call::get(url)).await?;

        Ok(response.status.is_success() && !response.on_signin_page(&self.config.signin_path))
    }

    /// Probes the session and logs in when it is gone.
    pub async fn ensure_authenticated(&self) -> Result<(), TradingViewError> {
        let generation = self.state.read().await.generation;

        if self.probe().await? {
            self.state.write().await.authenticated = true;
            return Ok(());
        }

        debug!(reason = "probe_failed", "Logging in to TradingView...");
        self.state.write().await.authenticated = false;
        self.relogin(generation).await
    }

    /// Forces a fresh login.
    pub async fn login(&self) -> Result<(), TradingViewError> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// Single-flight login: callers that queued behind a login which already
    /// succeeded since `seen_generation` return without logging in again.
    async fn relogin(&self, seen_generation: u64) -> Result<(), TradingViewError> {
        let _guard = self.login_lock.lock().await;

        if self.state.read().await.generation != seen_generation {
            debug!("TradingView session was refreshed by another caller");
            return Ok(());
        }

        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<(), TradingViewError> {
        if !self.config.has_credentials() {
            return Err(TradingViewError::MissingCredentials);
        }

        let signin_url = self.endpoint(&self.config.signin_path)?;
        let page = self.send(&Call::get(signin_url.clone())).await?;
        if !page.status.is_success() {
            return Err(page.unexpected());
        }

        let csrf_token = extract_csrf_token(&page.body).or_else(|| {
            self.cookie_header()
                .as_deref()
                .and_then(csrf_from_cookie_header)
        });
        if csrf_token.is_none() {
            debug!("No CSRF token on the sign-in page, posting without one");
        }
        self.state.write().await.csrf_token = csrf_token.clone();

        let form = vec![
            ("username", self.config.username.clone()),
            ("password", self.config.password.clone()),
            ("remember", "on".to_string()),
        ];
        let response = self.send(&Call::post(signin_url, form)).await?;

        let accepted = match login_signal(&response.body) {
            LoginSignal::Rejected(message) => {
                self.state.write().await.authenticated = false;
                metrics::counter!("tradingview_logins_total", "outcome" => "rejected").increment(1);
                return Err(TradingViewError::LoginRejected(message));
            }
            LoginSignal::Accepted => true,
            LoginSignal::Unknown => {
                response.status.is_success()
                    && !response.on_signin_page(&self.config.signin_path)
            }
        };

        if !accepted {
            self.state.write().await.authenticated = false;
            metrics::counter!("tradingview_logins_total", "outcome" => "rejected").increment(1);
            return Err(TradingViewError::LoginRejected(format!(
                "status {} at {}",
                response.status,
                response.final_url.path()
            )));
        }

        {
            let mut state = self.state.write().await;
            state.authenticated = true;
            state.csrf_token = self
                .cookie_header()
                .as_deref()
                .and_then(csrf_from_cookie_header)
                .or(csrf_token);
            state.last_login = Some(Utc::now().to_rfc3339());
            state.generation += 1;
        }

        metrics::counter!("tradingview_logins_total", "outcome" => "success").increment(1);
        info!(username = %self.config.username, "Logged in to TradingView");

        self.persist_session().await;
        Ok(())
    }

    async fn persist_session(&self) {
        let header = self.cookie_header().unwrap_or_default();
        let csrf_token = self.state.read().await.csrf_token.clone();
        let domain = self.base_url.host_str().unwrap_or_default();
        let snapshot = SessionSnapshot::from_cookie_header(&header, domain, csrf_token);

        if let Err(e) = self.session_store.save(&snapshot).await {
            warn!(error = %e, path = %self.session_store.path().display(), "Failed to persist TradingView session");
        }
    }

    /// Sends an authenticated call, re-logging in and retrying once when the
    /// response says the session is gone.
    async fn dispatch(&self, call: &Call) -> Result<RemoteResponse, TradingViewError> {
        let generation = self.state.read().await.generation;
        let response = self.send(call).await?;

        if !response.needs_login(&self.config.signin_path) {
            return Ok(response);
        }

        warn!(
            url = %call.url,
            status = %response.status,
            "TradingView session lost mid-call, logging in again"
        );
        self.state.write().await.authenticated = false;
        self.relogin(generation).await?;

        let retried = self.send(call).await?;
        if retried.needs_login(&self.config.signin_path) {
            self.state.write().await.authenticated = false;
            return Err(TradingViewError::SessionLost);
        }

        Ok(retried)
    }

    async fn mutate(
        &self,
        path: &str,
        form: Vec<(&'static str, String)>,
        policy: SuccessPolicy,
    ) -> MutationReport {
        if let Err(e) = self.ensure_authenticated().await {
            return MutationReport::failure(format!("not authenticated: {e}"));
        }

        let url = match self.endpoint(path) {
            Ok(url) => url,
            Err(e) => return MutationReport::failure(e.to_string()),
        };

        match self.dispatch(&Call::post(url, form)).await {
            Ok(response) => classify_mutation(response.status, &response.body, policy),
            Err(TradingViewError::Http(e)) => classify_transport_error(&e),
            Err(e) => MutationReport::failure(e.to_string()),
        }
    }

    async fn list_page(
        &self,
        pine_id: &str,
        username: Option<&str>,
        offset: u32,
    ) -> Result<HolderPage, TradingViewError> {
        let mut url = self.endpoint(&self.config.list_users_path)?;
        url.query_pairs_mut()
            .append_pair("limit", &self.config.list_page_size.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("order_by", "-created");

        let mut form = vec![("pine_id", pine_id.to_string())];
        if let Some(username) = username {
            form.push(("username", username.to_string()));
        }

        let response = self.dispatch(&Call::post(url, form)).await?;
        if !response.status.is_success() {
            return Err(response.unexpected());
        }

        holders_from_json(&response.body)
    }

    async fn check_profile(&self, username: &str) -> Result<UsernameCheck, TradingViewError> {
        let path = format!(
            "{}{}/",
            self.config.profile_path_prefix,
            urlencoding::encode(username)
        );
        let response = self.dispatch(&Call::get(self.endpoint(&path)?)).await?;

        let valid = match response.status {
            status if status.is_success() => !profile_missing(&response.body),
            StatusCode::NOT_FOUND => false,
            _ => return Err(response.unexpected()),
        };

        Ok(UsernameCheck {
            valid,
            username: username.to_string(),
        })
    }
}

/// Wire format for the `expiration` form field.
fn format_expiration(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[async_trait]
impl PermissionClient for TradingViewClient {
    async fn validate_username(&self, username: &str) -> Result<UsernameCheck, TradingViewError> {
        self.ensure_authenticated().await?;

        let mut url = self.endpoint(&self.config.username_hint_path)?;
        url.query_pairs_mut().append_pair("s", username);
        let response = self.dispatch(&Call::get(url)).await?;

        if response.status.is_success()
            && let Some(names) = usernames_from_hint(&response.body)
        {
            let matched = names
                .into_iter()
                .find(|name| name.eq_ignore_ascii_case(username));

            return Ok(match matched {
                Some(remote) => UsernameCheck {
                    valid: true,
                    username: remote,
                },
                None => UsernameCheck {
                    valid: false,
                    username: username.to_string(),
                },
            });
        }

        debug!(
            status = %response.status,
            "Username hint gave no JSON list, checking the profile page"
        );
        self.check_profile(username).await
    }

    async fn grant(
        &self,
        username: &str,
        pine_id: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> MutationReport {
        let mut form = vec![
            ("pine_id", pine_id.to_string()),
            ("username_recip", username.to_string()),
        ];
        if let Some(at) = expiration {
            form.push(("expiration", format_expiration(at)));
        }

        self.mutate(
            &self.config.add_path,
            form,
            self.config.grant_success_policy,
        )
        .await
    }

    async fn remove(&self, username: &str, pine_id: &str) -> MutationReport {
        let form = vec![
            ("pine_id", pine_id.to_string()),
            ("username_recip", username.to_string()),
        ];

        self.mutate(
            &self.config.remove_path,
            form,
            self.config.remove_success_policy,
        )
        .await
    }

    async fn list_holders(&self, pine_id: &str) -> Result<Vec<Holder>, TradingViewError> {
        self.ensure_authenticated().await?;

        let page_size = self.config.list_page_size;
        let mut holders = Vec::new();

        for page in 0..self.config.max_list_pages {
            if page > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.call_delay_ms)).await;
            }

            let batch = self.list_page(pine_id, None, page * page_size).await?;
            if batch.holders.len() < batch.returned {
                warn!(
                    pine_id = %pine_id,
                    skipped = batch.returned - batch.holders.len(),
                    "Skipped holder entries without a username"
                );
            }
            let short_page = batch.returned < page_size as usize;
            holders.extend(batch.holders);

            if short_page {
                return Ok(holders);
            }
        }

        warn!(
            pine_id = %pine_id,
            pages = self.config.max_list_pages,
            holders = holders.len(),
            "Holder listing stopped at the page limit"
        );
        Ok(holders)
    }

    async fn check_access(
        &self,
        username: &str,
        pine_id: &str,
    ) -> Result<AccessStatus, TradingViewError> {
        self.ensure_authenticated().await?;

        let page = self.list_page(pine_id, Some(username), 0).await?;
        let holder = page
            .holders
            .iter()
            .find(|h| h.username.eq_ignore_ascii_case(username));

        Ok(AccessStatus::from_holder(pine_id, username, holder))
    }

    async fn session_status(&self) -> SessionStatus {
        let state = self.state.read().await;
        SessionStatus {
            authenticated: state.authenticated,
            credentials_configured: self.config.has_credentials(),
            csrf_token_known: state.csrf_token.is_some(),
            last_login: state.last_login.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_expiration() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_expiration(at), "2030-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_needs_login() {
        let response = |status: StatusCode, path: &str| RemoteResponse {
            status,
            final_url: Url::parse("https://tv.example").unwrap().join(path).unwrap(),
            body: String::new(),
        };

        assert!(response(StatusCode::OK, "/accounts/signin/?next=/chart/").needs_login("/accounts/signin/"));
        assert!(response(StatusCode::FORBIDDEN, "/pine_perm/add/").needs_login("/accounts/signin/"));
        assert!(!response(StatusCode::OK, "/pine_perm/add/").needs_login("/accounts/signin/"));
        assert!(!response(StatusCode::NOT_FOUND, "/u/nobody/").needs_login("/accounts/signin/"));
    }
}

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use super::scrape::{excerpt, json_success_signal};
use crate::config::SuccessPolicy;
use crate::constants::limits::MAX_BODY_EXCERPT;
use crate::domain::Outcome;

#[derive(Debug, Error)]
pub enum TradingViewError {
    #[error("TradingView credentials are not configured")]
    MissingCredentials,

    #[error("TradingView rejected the login: {0}")]
    LoginRejected(String),

    #[error("TradingView session could not be re-established")]
    SessionLost,

    #[error("Unexpected TradingView response ({status}): {excerpt}")]
    UnexpectedStatus { status: u16, excerpt: String },

    #[error("Unparseable TradingView response: {0}")]
    Parse(String),

    #[error("Invalid TradingView URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("TradingView request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result of one grant or remove call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MutationReport {
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub detail: String,
}

impl MutationReport {
    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure,
            status: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn ambiguous(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Ambiguous,
            status: None,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UsernameCheck {
    pub valid: bool,
    /// Remote casing when the hint endpoint matched, otherwise the input.
    pub username: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Holder {
    pub username: String,
    pub expiration: Option<String>,
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccessStatus {
    pub pine_id: String,
    pub username: String,
    pub has_access: bool,
    pub no_expiration: bool,
    pub expiration: Option<String>,
}

impl AccessStatus {
    #[must_use]
    pub fn from_holder(pine_id: &str, username: &str, holder: Option<&Holder>) -> Self {
        Self {
            pine_id: pine_id.to_string(),
            username: holder.map_or_else(|| username.to_string(), |h| h.username.clone()),
            has_access: holder.is_some(),
            no_expiration: holder.is_some_and(|h| h.expiration.is_none()),
            expiration: holder.and_then(|h| h.expiration.clone()),
        }
    }
}

/// Point at which a request failed without producing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    /// Never left the process: bad request or connection refused.
    BeforeSend,
    /// May have reached the server: timeout, reset, or a broken body.
    AfterSend,
}

impl TransportStage {
    #[must_use]
    pub fn of(err: &reqwest::Error) -> Self {
        if err.is_builder() || (err.is_connect() && !err.is_timeout()) {
            Self::BeforeSend
        } else {
            Self::AfterSend
        }
    }
}

#[must_use]
pub fn classify_transport(stage: TransportStage, detail: &str) -> MutationReport {
    match stage {
        TransportStage::BeforeSend => MutationReport::failure(format!("not sent: {detail}")),
        TransportStage::AfterSend => {
            MutationReport::ambiguous(format!("no reliable response: {detail}"))
        }
    }
}

#[must_use]
pub fn classify_transport_error(err: &reqwest::Error) -> MutationReport {
    classify_transport(TransportStage::of(err), &err.to_string())
}

/// Maps a mutation response to an outcome.
///
/// 4xx is a failure and 5xx is ambiguous under every policy; 2xx is judged by
/// `policy`.
#[must_use]
pub fn classify_mutation(status: StatusCode, body: &str, policy: SuccessPolicy) -> MutationReport {
    let body_excerpt = excerpt(body, MAX_BODY_EXCERPT);
    let report = |outcome: Outcome, detail: String| MutationReport {
        outcome,
        status: Some(status.as_u16()),
        detail,
    };

    if status.is_server_error() {
        return report(Outcome::Ambiguous, format!("server error {status}: {body_excerpt}"));
    }

    if !status.is_success() {
        return report(Outcome::Failure, format!("rejected with {status}: {body_excerpt}"));
    }

    let signal = json_success_signal(body);

    match (policy, signal) {
        (SuccessPolicy::StatusOnly, _) => report(Outcome::Success, format!("{status}")),
        (_, Some(true)) => report(Outcome::Success, format!("{status}: {body_excerpt}")),
        (_, Some(false)) => report(Outcome::Failure, format!("negative response: {body_excerpt}")),
        (_, None) => report(
            Outcome::Ambiguous,
            format!("{status} without a success signal: {body_excerpt}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [SuccessPolicy; 3] = [
        SuccessPolicy::StatusOnly,
        SuccessPolicy::JsonField,
        SuccessPolicy::StatusAndJson,
    ];

    #[test]
    fn test_client_errors_fail_under_every_policy() {
        for policy in POLICIES {
            for status in [StatusCode::BAD_REQUEST, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND] {
                let r = classify_mutation(status, r#"{"success": true}"#, policy);
                assert_eq!(r.outcome, Outcome::Failure, "{policy:?} {status}");
                assert_eq!(r.status, Some(status.as_u16()));
            }
        }
    }

    #[test]
    fn test_server_errors_are_ambiguous_under_every_policy() {
        for policy in POLICIES {
            for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
                let r = classify_mutation(status, "", policy);
                assert_eq!(r.outcome, Outcome::Ambiguous, "{policy:?} {status}");
            }
        }
    }

    #[test]
    fn test_status_only_ignores_body() {
        for body in ["", "OK", r#"{"success": false}"#] {
            let r = classify_mutation(StatusCode::OK, body, SuccessPolicy::StatusOnly);
            assert_eq!(r.outcome, Outcome::Success);
        }
    }

    #[test]
    fn test_json_policies_follow_signal() {
        for policy in [SuccessPolicy::JsonField, SuccessPolicy::StatusAndJson] {
            assert_eq!(
                classify_mutation(StatusCode::OK, r#"{"status": "ok"}"#, policy).outcome,
                Outcome::Success
            );
            assert_eq!(
                classify_mutation(StatusCode::OK, r#"{"error": "no user"}"#, policy).outcome,
                Outcome::Failure
            );
            assert_eq!(
                classify_mutation(StatusCode::OK, "<html></html>", policy).outcome,
                Outcome::Ambiguous
            );
        }
    }

    #[test]
    fn test_transport_stages() {
        assert_eq!(
            classify_transport(TransportStage::BeforeSend, "connection refused").outcome,
            Outcome::Failure
        );
        assert_eq!(
            classify_transport(TransportStage::AfterSend, "timed out").outcome,
            Outcome::Ambiguous
        );
    }

    #[test]
    fn test_access_status_from_holder() {
        let holder = Holder {
            username: "Alice".to_string(),
            expiration: None,
            created: None,
        };
        let status = AccessStatus::from_holder("PUB;1", "alice", Some(&holder));
        assert!(status.has_access);
        assert!(status.no_expiration);
        assert_eq!(status.username, "Alice");

        let missing = AccessStatus::from_holder("PUB;1", "alice", None);
        assert!(!missing.has_access);
        assert!(!missing.no_expiration);
    }
}

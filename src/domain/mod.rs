//! Domain vocabulary shared by the store, the remote client and the API.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::tradingview::MAX_GRANT_DAYS;

/// Lifecycle of an access key. `Active` is the only state that can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Used,
    Expired,
}

impl KeyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "expired" => Ok(Self::Expired),
            other => Err(DomainParseError::KeyStatus(other.to_string())),
        }
    }
}

/// Remote operation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Validate,
    Check,
    Grant,
    Remove,
    List,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Check => "check",
            Self::Grant => "grant",
            Self::Remove => "remove",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate" => Ok(Self::Validate),
            "check" => Ok(Self::Check),
            "grant" => Ok(Self::Grant),
            "remove" => Ok(Self::Remove),
            "list" => Ok(Self::List),
            other => Err(DomainParseError::Operation(other.to_string())),
        }
    }
}

/// Result of a remote call.
///
/// `Ambiguous` means the request may have reached TradingView but its effect
/// is unknown (timeout after sending, 5xx, or no success signal in the body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Ambiguous,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Ambiguous => "ambiguous",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(DomainParseError::Outcome(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainParseError {
    #[error("Unknown key status: {0}")]
    KeyStatus(String),

    #[error("Unknown operation: {0}")]
    Operation(String),

    #[error("Unknown outcome: {0}")]
    Outcome(String),

    #[error("Invalid duration '{0}': expected 'lifetime' or <n><D|W|M|Y>")]
    Duration(String),

    #[error("Duration '{0}' is too long; use 'lifetime' instead")]
    DurationTooLong(String),
}

/// How long a grant lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDuration {
    Lifetime,
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl AccessDuration {
    /// Parses `lifetime`, `1L`, or a count followed by `D`, `W`, `M` or `Y`
    /// (case-insensitive), e.g. `7D`, `1M`.
    pub fn parse(input: &str) -> Result<Self, DomainParseError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("lifetime") {
            return Ok(Self::Lifetime);
        }

        let err = || DomainParseError::Duration(input.to_string());

        let unit = trimmed.chars().last().ok_or_else(err)?;
        let count: u32 = trimmed[..trimmed.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| err())?;

        if count == 0 {
            return Err(err());
        }

        let duration = match unit.to_ascii_uppercase() {
            'L' => return Ok(Self::Lifetime),
            'D' => Self::Days(count),
            'W' => Self::Weeks(count),
            'M' => Self::Months(count),
            'Y' => Self::Years(count),
            _ => return Err(err()),
        };

        if duration.max_days() > MAX_GRANT_DAYS {
            return Err(DomainParseError::DurationTooLong(input.to_string()));
        }
        Ok(duration)
    }

    /// Upper bound of the span in days, counting 31-day months and 366-day years.
    fn max_days(self) -> u64 {
        match self {
            Self::Lifetime => 0,
            Self::Days(n) => u64::from(n),
            Self::Weeks(n) => u64::from(n) * 7,
            Self::Months(n) => u64::from(n) * 31,
            Self::Years(n) => u64::from(n) * 366,
        }
    }

    /// Expiration relative to `from`; `Ok(None)` means no expiration.
    pub fn expires_at(self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, DomainParseError> {
        let at = match self {
            Self::Lifetime => return Ok(None),
            Self::Days(n) => from.checked_add_signed(Duration::days(i64::from(n))),
            Self::Weeks(n) => from.checked_add_signed(Duration::weeks(i64::from(n))),
            Self::Months(n) => from.checked_add_months(Months::new(n)),
            Self::Years(n) => n.checked_mul(12).and_then(|m| from.checked_add_months(Months::new(m))),
        };
        at.map(Some)
            .ok_or_else(|| DomainParseError::DurationTooLong(self.to_string()))
    }
}

impl fmt::Display for AccessDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifetime => f.write_str("lifetime"),
            Self::Days(n) => write!(f, "{n}D"),
            Self::Weeks(n) => write!(f, "{n}W"),
            Self::Months(n) => write!(f, "{n}M"),
            Self::Years(n) => write!(f, "{n}Y"),
        }
    }
}

impl FromStr for AccessDuration {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AccessDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccessDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_durations() {
        assert_eq!(AccessDuration::parse("lifetime"), Ok(AccessDuration::Lifetime));
        assert_eq!(AccessDuration::parse("1L"), Ok(AccessDuration::Lifetime));
        assert_eq!(AccessDuration::parse("7D"), Ok(AccessDuration::Days(7)));
        assert_eq!(AccessDuration::parse("2w"), Ok(AccessDuration::Weeks(2)));
        assert_eq!(AccessDuration::parse("1M"), Ok(AccessDuration::Months(1)));
        assert_eq!(AccessDuration::parse(" 3Y "), Ok(AccessDuration::Years(3)));

        assert!(AccessDuration::parse("").is_err());
        assert!(AccessDuration::parse("D").is_err());
        assert!(AccessDuration::parse("0D").is_err());
        assert!(AccessDuration::parse("5X").is_err());
        assert!(AccessDuration::parse("-1D").is_err());
    }

    #[test]
    fn test_expiration() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();

        assert_eq!(AccessDuration::Lifetime.expires_at(from), Ok(None));
        assert_eq!(
            AccessDuration::Days(7).expires_at(from),
            Ok(Some(Utc.with_ymd_and_hms(2024, 2, 7, 12, 0, 0).unwrap()))
        );
        // chrono clamps to the last day of the month
        assert_eq!(
            AccessDuration::Months(1).expires_at(from),
            Ok(Some(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()))
        );
        assert_eq!(
            AccessDuration::Years(1).expires_at(from),
            Ok(Some(Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        assert_eq!(
            AccessDuration::parse("300000Y"),
            Err(DomainParseError::DurationTooLong("300000Y".to_string()))
        );
        assert!(AccessDuration::parse("5000W").is_err());
        assert!(AccessDuration::parse("4294967295D").is_err());
        assert_eq!(AccessDuration::parse("100Y"), Ok(AccessDuration::Years(100)));

        // constructed directly, a span past chrono's range is an error, never lifetime
        let now = Utc::now();
        assert!(AccessDuration::Years(300_000).expires_at(now).is_err());
        assert!(AccessDuration::Days(u32::MAX).expires_at(now).is_err());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!("used".parse::<KeyStatus>(), Ok(KeyStatus::Used));
        assert_eq!(Operation::Grant.to_string(), "grant");
        assert_eq!("ambiguous".parse::<Outcome>(), Ok(Outcome::Ambiguous));
        assert!("maybe".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_duration_serde() {
        let d: AccessDuration = serde_json::from_str("\"30D\"").unwrap();
        assert_eq!(d, AccessDuration::Days(30));
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"30D\"");
    }
}

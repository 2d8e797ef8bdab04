//! Access key registry: single-use invitation codes.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AccessKeyConfig;
use crate::constants::keys::{ALPHABET, MAX_BATCH_SIZE, MAX_GENERATION_ATTEMPTS};
use crate::db::{AccessKey, AuditEntry, Store};
use crate::domain::KeyStatus;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Access key not found")]
    NotFound,

    #[error("Access key has already been used")]
    AlreadyUsed,

    #[error("Access key has expired")]
    Expired,

    #[error("No unique access key after {0} attempts")]
    Exhausted(usize),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for KeyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct KeyStats {
    pub total: u64,
    pub active: u64,
    pub used: u64,
    pub expired: u64,
}

/// A key together with every audit entry recorded under it.
#[derive(Debug, Clone, Serialize)]
pub struct KeyAccess {
    pub key: AccessKey,
    pub logs: Vec<AuditEntry>,
}

#[must_use]
pub fn random_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Codes are matched case-insensitively and stored uppercase.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub struct AccessKeyService {
    store: Store,
    config: AccessKeyConfig,
}

impl AccessKeyService {
    #[must_use]
    pub const fn new(store: Store, config: AccessKeyConfig) -> Self {
        Self { store, config }
    }

    pub async fn generate(&self) -> Result<AccessKey, KeyError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = random_code(self.config.code_length);

            if let Some(key) = self.store.insert_access_key(&code).await? {
                info!(code = %key.code, "Generated access key");
                return Ok(key);
            }

            debug!(attempt, "Access key collision, drawing again");
        }

        warn!(
            attempts = MAX_GENERATION_ATTEMPTS,
            "Gave up generating a unique access key"
        );
        Err(KeyError::Exhausted(MAX_GENERATION_ATTEMPTS))
    }

    pub async fn generate_batch(&self, count: usize) -> Result<Vec<AccessKey>, KeyError> {
        if count == 0 || count > MAX_BATCH_SIZE {
            return Err(KeyError::Validation(format!(
                "count must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }

        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(self.generate().await?);
        }
        Ok(keys)
    }

    /// Returns the key only while it is redeemable.
    pub async fn validate(&self, code: &str) -> Result<AccessKey, KeyError> {
        let code = normalize_code(code);
        let key = self
            .store
            .get_access_key(&code)
            .await?
            .ok_or(KeyError::NotFound)?;

        match key.status {
            KeyStatus::Used => Err(KeyError::AlreadyUsed),
            KeyStatus::Expired => Err(KeyError::Expired),
            KeyStatus::Active if self.is_past_ttl(&key) => {
                if self.store.mark_access_key_expired(&code).await? {
                    info!(code = %code, "Access key expired");
                }
                Err(KeyError::Expired)
            }
            KeyStatus::Active => Ok(key),
        }
    }

    /// `active -> used`. Of two concurrent calls on one key, one wins and the
    /// other gets [`KeyError::AlreadyUsed`].
    pub async fn mark_used(
        &self,
        code: &str,
        bound_user_id: Option<i32>,
        bound_username: Option<&str>,
    ) -> Result<AccessKey, KeyError> {
        let code = normalize_code(code);
        self.validate(&code).await?;

        if !self
            .store
            .mark_access_key_used(&code, bound_user_id, bound_username)
            .await?
        {
            return Err(self.explain_rejection(&code).await);
        }

        info!(code = %code, user_id = ?bound_user_id, "Access key redeemed");
        self.store
            .get_access_key(&code)
            .await?
            .ok_or(KeyError::NotFound)
    }

    /// Why a conditional `active -> used` update touched no row.
    pub async fn explain_rejection(&self, code: &str) -> KeyError {
        match self.store.get_access_key(code).await {
            Ok(None) => KeyError::NotFound,
            Ok(Some(key)) => match key.status {
                KeyStatus::Used => KeyError::AlreadyUsed,
                KeyStatus::Expired => KeyError::Expired,
                KeyStatus::Active => {
                    KeyError::Internal(format!("Key {code} is active but was not updated"))
                }
            },
            Err(e) => KeyError::Internal(e.to_string()),
        }
    }

    pub async fn list(&self) -> Result<Vec<AccessKey>, KeyError> {
        Ok(self.store.list_access_keys().await?)
    }

    pub async fn stats(&self) -> Result<KeyStats, KeyError> {
        let active = self.store.count_access_keys(KeyStatus::Active).await?;
        let used = self.store.count_access_keys(KeyStatus::Used).await?;
        let expired = self.store.count_access_keys(KeyStatus::Expired).await?;

        Ok(KeyStats {
            total: active + used + expired,
            active,
            used,
            expired,
        })
    }

    pub async fn key_access(&self, code: &str) -> Result<KeyAccess, KeyError> {
        let code = normalize_code(code);
        let key = self
            .store
            .get_access_key(&code)
            .await?
            .ok_or(KeyError::NotFound)?;
        let logs = self.store.audit_for_key(&code).await?;

        Ok(KeyAccess { key, logs })
    }

    fn is_past_ttl(&self, key: &AccessKey) -> bool {
        let Some(hours) = self.config.ttl_hours else {
            return false;
        };

        match DateTime::parse_from_rfc3339(&key.created_at) {
            // a TTL that runs past chrono's range never elapses
            Ok(created) => created
                .with_timezone(&Utc)
                .checked_add_signed(Duration::hours(i64::from(hours)))
                .is_some_and(|deadline| deadline <= Utc::now()),
            Err(e) => {
                warn!(code = %key.code, error = %e, "Unreadable key timestamp, treating as live");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn service(config: AccessKeyConfig) -> (Store, AccessKeyService) {
        let store = Store::new("sqlite::memory:").await.unwrap();
        (store.clone(), AccessKeyService::new(store, config))
    }

    #[test]
    fn test_random_code_alphabet_and_length() {
        for length in [8, 12, 16] {
            let code = random_code(length);
            assert_eq!(code.len(), length);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_batch_codes_are_unique() {
        let (_, keys) = service(AccessKeyConfig::default()).await;
        let batch = keys.generate_batch(50).await.unwrap();

        let codes: HashSet<_> = batch.iter().map(|k| k.code.clone()).collect();
        assert_eq!(codes.len(), 50);
        assert!(batch.iter().all(|k| k.status == KeyStatus::Active));
        assert!(matches!(
            keys.generate_batch(0).await,
            Err(KeyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_then_use_then_validate() {
        let (store, keys) = service(AccessKeyConfig::default()).await;
        store.insert_access_key("ABCD1234").await.unwrap();

        assert_eq!(keys.validate("abcd1234").await.unwrap().code, "ABCD1234");
        keys.mark_used("ABCD1234", None, Some("trader")).await.unwrap();
        assert!(matches!(
            keys.validate("ABCD1234").await,
            Err(KeyError::AlreadyUsed)
        ));
        assert!(matches!(
            keys.validate("ZZZZ9999").await,
            Err(KeyError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_second_mark_used_is_rejected() {
        let (store, keys) = service(AccessKeyConfig::default()).await;
        store.insert_access_key("ONCEONLY").await.unwrap();

        let used = keys.mark_used("ONCEONLY", None, None).await.unwrap();
        assert_eq!(used.status, KeyStatus::Used);
        assert!(matches!(
            keys.mark_used("ONCEONLY", None, None).await,
            Err(KeyError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_mark_used_has_one_winner() {
        let dir = std::env::temp_dir().join(format!("pinegate-keys-{}", uuid::Uuid::new_v4()));
        let db_url = format!("sqlite://{}?mode=rwc", dir.join("keys.db").display());
        let store = Store::new(&db_url).await.unwrap();
        let keys = AccessKeyService::new(store.clone(), AccessKeyConfig::default());
        store.insert_access_key("RACE0001").await.unwrap();

        let (first, second) = tokio::join!(
            keys.mark_used("RACE0001", None, Some("alice")),
            keys.mark_used("RACE0001", None, Some("bob")),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(KeyError::AlreadyUsed)))
                .count(),
            1
        );

        let key = store.get_access_key("RACE0001").await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Used);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let config = AccessKeyConfig {
            ttl_hours: Some(u32::MAX),
            ..AccessKeyConfig::default()
        };
        let (store, keys) = service(config).await;
        store.insert_access_key("FOREVER1").await.unwrap();

        assert_eq!(keys.validate("FOREVER1").await.unwrap().code, "FOREVER1");
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let config = AccessKeyConfig {
            ttl_hours: Some(0),
            ..AccessKeyConfig::default()
        };
        let (store, keys) = service(config).await;
        store.insert_access_key("OLDKEY12").await.unwrap();

        assert!(matches!(
            keys.validate("OLDKEY12").await,
            Err(KeyError::Expired)
        ));
        let key = store.get_access_key("OLDKEY12").await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Expired);
    }

    #[tokio::test]
    async fn test_stats_and_key_access() {
        let (store, keys) = service(AccessKeyConfig::default()).await;
        keys.generate_batch(3).await.unwrap();
        store.insert_access_key("USEDKEY1").await.unwrap();
        keys.mark_used("USEDKEY1", None, None).await.unwrap();

        let stats = keys.stats().await.unwrap();
        assert_eq!(
            stats,
            KeyStats {
                total: 4,
                active: 3,
                used: 1,
                expired: 0
            }
        );

        let view = keys.key_access("usedkey1").await.unwrap();
        assert_eq!(view.key.code, "USEDKEY1");
        assert!(view.logs.is_empty());
    }
}

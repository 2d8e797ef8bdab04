//! `SeaORM` implementation of the `AuthService` trait.

use crate::config::SecurityConfig;
use crate::constants::passwords::MIN_LENGTH;
use crate::db::repositories::access_key::AccessKeyRepository;
use crate::db::repositories::user::UserRepository;
use crate::db::{MirroredGrant, NewUser, Store};
use crate::domain::AccessDuration;
use crate::services::access_keys::{AccessKeyService, normalize_code};
use crate::services::auth_service::{AuthError, AuthService, LoginResult, Registration, UserInfo};
use crate::services::permissions::{AccessContext, BatchReport, PermissionService};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct SeaOrmAuthService {
    store: Store,
    security: SecurityConfig,
    keys: Arc<AccessKeyService>,
    permissions: Arc<PermissionService>,
    default_duration: AccessDuration,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(
        store: Store,
        security: SecurityConfig,
        keys: Arc<AccessKeyService>,
        permissions: Arc<PermissionService>,
        default_duration: AccessDuration,
    ) -> Self {
        Self {
            store,
            security,
            keys,
            permissions,
            default_duration,
        }
    }

    async fn user(&self, user_id: i32) -> Result<crate::db::User, AuthError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();

    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            })
        && !email.chars().any(char::is_whitespace);

    if !valid {
        return Err(AuthError::Validation("A valid email address is required".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_LENGTH} characters"
        )));
    }
    Ok(())
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResult, AuthError> {
        let is_valid = self.store.verify_user_password(email, password).await?;

        if !is_valid {
            return Err(AuthError::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(LoginResult {
            api_key: user.api_key.clone(),
            user: user.into(),
        })
    }

    async fn register(&self, registration: Registration) -> Result<UserInfo, AuthError> {
        let email = validate_email(&registration.email)?;
        validate_password(&registration.password)?;

        let display_name = match registration.display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };

        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let key = self.keys.validate(&normalize_code(&registration.access_key)).await?;

        let txn = self.store.begin().await?;

        let user = UserRepository::create_with(
            &txn,
            NewUser {
                email: &email,
                password: &registration.password,
                display_name: &display_name,
                is_admin: false,
            },
            &self.security,
        )
        .await?;

        if !AccessKeyRepository::mark_used_with(&txn, &key.code, Some(user.id), None).await? {
            txn.rollback().await?;
            return Err(AuthError::Key(self.keys.explain_rejection(&key.code).await));
        }

        txn.commit().await?;

        info!(email = %user.email, code = %key.code, "Registered user with access key");
        Ok(user.into())
    }

    async fn verify_api_key(&self, api_key: &str) -> Result<Option<UserInfo>, AuthError> {
        let user = self.store.verify_api_key(api_key).await?;
        Ok(user.map(UserInfo::from))
    }

    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError> {
        Ok(self.user(user_id).await?.into())
    }

    async fn bind_tradingview_username(
        &self,
        user_id: i32,
        username: &str,
    ) -> Result<UserInfo, AuthError> {
        let user = self.user(user_id).await?;
        let username = username.trim();

        if username.is_empty() {
            return Err(AuthError::Validation("TradingView username is required".to_string()));
        }

        if !user.is_admin
            && let Some(current) = user.tradingview_username.as_deref()
            && !current.eq_ignore_ascii_case(username)
            && self.store.grant_count_for_user(user.id).await? > 0
        {
            return Err(AuthError::Conflict(format!(
                "Access is already held under '{current}'; it must be removed before binding another username"
            )));
        }

        let ctx = AccessContext {
            actor: user.email.clone(),
            user_id: Some(user.id),
            key_code: self
                .store
                .get_access_key_for_user(user.id)
                .await?
                .map(|k| k.code),
        };
        let check = self.permissions.validate_username(&ctx, username).await?;

        if !check.valid {
            return Err(AuthError::UnknownTradingViewUser(username.to_string()));
        }

        let updated = self
            .store
            .set_user_tradingview_username(user.id, Some(&check.username))
            .await?;

        info!(email = %updated.email, tradingview_username = %check.username, "Bound TradingView username");
        Ok(updated.into())
    }

    async fn request_access(
        &self,
        user_id: i32,
        pine_ids: Option<Vec<String>>,
        duration: Option<AccessDuration>,
    ) -> Result<BatchReport, AuthError> {
        let user = self.user(user_id).await?;

        let username = user.tradingview_username.clone().ok_or_else(|| {
            AuthError::Validation("Bind a TradingView username before requesting access".to_string())
        })?;

        if user.has_generated_access && self.store.grant_count_for_user(user.id).await? > 0 {
            return Err(AuthError::Conflict(
                "Access has already been granted for this account".to_string(),
            ));
        }

        let visible = self.store.list_agent_visible_scripts().await?;

        let selected: Vec<String> = match pine_ids {
            None => visible.iter().map(|s| s.pine_id.clone()).collect(),
            Some(requested) => {
                let unknown: Vec<&str> = requested
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !visible.iter().any(|s| s.pine_id == *id))
                    .collect();
                if !unknown.is_empty() {
                    return Err(AuthError::Validation(format!(
                        "Scripts not available: {}",
                        unknown.join(", ")
                    )));
                }
                requested
            }
        };

        if selected.is_empty() {
            return Err(AuthError::Validation("No scripts are available".to_string()));
        }

        let ctx = AccessContext {
            actor: user.email.clone(),
            user_id: Some(user.id),
            key_code: self
                .store
                .get_access_key_for_user(user.id)
                .await?
                .map(|k| k.code),
        };

        let report = self
            .permissions
            .grant(
                &ctx,
                &username,
                &selected,
                duration.unwrap_or(self.default_duration),
            )
            .await?;

        if report.succeeded > 0 {
            self.store.set_user_has_generated_access(user.id, true).await?;
        }

        Ok(report)
    }

    async fn my_access(&self, user_id: i32) -> Result<Vec<MirroredGrant>, AuthError> {
        Ok(self.store.list_grants_for_user(user_id).await?)
    }

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let user = self.user(user_id).await?;

        let is_valid = self
            .store
            .verify_user_password(&user.email, current_password)
            .await?;

        if !is_valid {
            return Err(AuthError::Validation("Current password is incorrect".to_string()));
        }

        self.store
            .update_user_password(user.id, new_password, &self.security)
            .await?;

        Ok(())
    }

    async fn get_api_key(&self, user_id: i32) -> Result<String, AuthError> {
        Ok(self.user(user_id).await?.api_key)
    }

    async fn regenerate_api_key(&self, user_id: i32) -> Result<String, AuthError> {
        let new_api_key = self.store.regenerate_user_api_key(user_id).await?;

        Ok(new_api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(" User@Example.com ").unwrap(), "user@example.com");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@nodot").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("short").is_err());
    }
}

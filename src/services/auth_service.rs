//! Domain service for accounts: registration with an access key, login,
//! TradingView username binding, and self-service access requests.

use serde::Serialize;
use thiserror::Error;

use crate::db::{MirroredGrant, User};
use crate::domain::AccessDuration;
use crate::services::access_keys::KeyError;
use crate::services::permissions::{BatchReport, PermissionError};

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("TradingView username '{0}' was not found")]
    UnknownTradingViewUser(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("TradingView error: {0}")]
    Remote(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PermissionError> for AuthError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::Validation(msg) => Self::Validation(msg),
            PermissionError::Remote(e) => Self::Remote(e.to_string()),
            PermissionError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// User info DTO for responses.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
    pub tradingview_username: Option<String>,
    pub has_generated_access: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            is_admin: user.is_admin,
            tradingview_username: user.tradingview_username,
            has_generated_access: user.has_generated_access,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Login result containing user info and API key.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub user: UserInfo,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub access_key: String,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Verifies credentials and returns user info.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if login fails.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResult, AuthError>;

    /// Creates an account and redeems the access key in one transaction.
    ///
    /// # Errors
    ///
    /// Key problems surface as [`AuthError::Key`] with the specific reason.
    async fn register(&self, registration: Registration) -> Result<UserInfo, AuthError>;

    /// Verifies an API key and returns the associated user if valid.
    async fn verify_api_key(&self, api_key: &str) -> Result<Option<UserInfo>, AuthError>;

    /// Gets information for a specific user.
    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError>;

    /// Validates `username` on TradingView and binds it to the account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Conflict`] when a non-admin user still holds
    /// grants under a different username.
    async fn bind_tradingview_username(
        &self,
        user_id: i32,
        username: &str,
    ) -> Result<UserInfo, AuthError>;

    /// Grants the visible catalog (or `pine_ids` out of it) to the bound username.
    async fn request_access(
        &self,
        user_id: i32,
        pine_ids: Option<Vec<String>>,
        duration: Option<AccessDuration>,
    ) -> Result<BatchReport, AuthError>;

    /// Grants mirrored locally for the user.
    async fn my_access(&self, user_id: i32) -> Result<Vec<MirroredGrant>, AuthError>;

    /// Changes a user's password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] if current password is incorrect or new password invalid.
    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Gets the current API key for a user.
    async fn get_api_key(&self, user_id: i32) -> Result<String, AuthError>;

    /// Regenerates the API key for a user and returns the new one.
    async fn regenerate_api_key(&self, user_id: i32) -> Result<String, AuthError>;
}

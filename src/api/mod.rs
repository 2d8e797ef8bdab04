use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use time;

use crate::clients::PermissionClient;
use crate::config::Config;
use crate::state::SharedState;

mod access;
mod audit;
pub mod auth;
mod error;
mod keys;
mod me;
mod observability;
mod scripts;
mod system;
mod types;
mod validation;

pub use error::ApiError;
pub use types::*;

use tokio::sync::RwLock;

use crate::services::{
    AccessKeyService, AuditService, AuthService, CatalogService, PermissionService,
};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<AccessKeyService> {
        &self.shared.keys
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<CatalogService> {
        &self.shared.catalog
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditService> {
        &self.shared.audit
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionService> {
        &self.shared.permissions
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn tradingview(&self) -> &Arc<dyn PermissionClient> {
        &self.shared.tradingview
    }
}

pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

/// Builds the state around a caller-supplied TradingView client.
pub async fn create_app_state_with_client(
    config: Config,
    client: Arc<dyn PermissionClient>,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::with_client(config, client).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, secure_cookies, inactivity_minutes) = {
        let config = state.config().read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
            config.server.session_inactivity_minutes,
        )
    };

    let authenticated_routes = create_authenticated_router(state.clone());
    let admin_routes = create_admin_router(state.clone());

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            inactivity_minutes,
        )));

    let api_router = Router::new()
        .merge(admin_routes)
        .merge(authenticated_routes)
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/register", post(auth::register))
        .route("/keys/validate", post(keys::validate_key))
        .route("/system/health", get(system::health))
        .layer(session_layer)
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
}

fn create_authenticated_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::get_current_user))
        .route("/auth/password", put(auth::change_password))
        .route("/auth/api-key", get(auth::get_api_key))
        .route("/auth/api-key/regenerate", post(auth::regenerate_api_key))
        .route("/me/tradingview", put(me::bind_tradingview))
        .route("/me/access", get(me::my_access))
        .route("/me/access", post(me::request_access))
        .route("/scripts/visible", get(scripts::list_visible_scripts))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}

fn create_admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/keys", get(keys::list_keys))
        .route("/keys", post(keys::generate_keys))
        .route("/keys/stats", get(keys::key_stats))
        .route("/keys/{code}", get(keys::key_access))
        .route("/scripts", get(scripts::list_scripts))
        .route("/scripts", post(scripts::add_script))
        .route("/scripts/{pine_id}", delete(scripts::delete_script))
        .route("/scripts/{pine_id}/active", put(scripts::set_script_active))
        .route(
            "/scripts/{pine_id}/visibility",
            put(scripts::set_script_visibility),
        )
        .route("/validate-username", post(access::validate_username))
        .route("/grant-access", post(access::grant_access))
        .route("/remove-access", post(access::remove_access))
        .route("/check-access", post(access::check_access))
        .route("/script-users/{pine_id}", get(access::script_users))
        .route("/audit", get(audit::list_audit))
        .route("/audit/summary", get(audit::audit_summary))
        .route("/system/status", get(system::get_status))
        .route("/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn(auth::require_admin))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}

pub mod access_keys;
pub use access_keys::{AccessKeyService, KeyAccess, KeyError, KeyStats};

pub mod audit;
pub use audit::{AuditService, AuditSummary};

pub mod catalog;
pub use catalog::{CatalogError, CatalogService};

pub mod permissions;
pub use permissions::{
    AccessCheck, AccessContext, BatchReport, PermissionError, PermissionService, ScriptReport,
};

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthService, LoginResult, Registration, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;

pub use super::access_grants::Entity as AccessGrants;
pub use super::access_keys::Entity as AccessKeys;
pub use super::access_logs::Entity as AccessLogs;
pub use super::pine_scripts::Entity as PineScripts;
pub use super::users::Entity as Users;

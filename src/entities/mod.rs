pub mod prelude;

pub mod access_grants;
pub mod access_keys;
pub mod access_logs;
pub mod pine_scripts;
pub mod users;

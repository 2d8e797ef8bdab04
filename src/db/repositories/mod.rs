pub mod access_key;
pub mod audit;
pub mod grant;
pub mod script;
pub mod user;

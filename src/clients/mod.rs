pub mod tradingview;

pub use tradingview::{PermissionClient, SessionStatus, TradingViewClient};

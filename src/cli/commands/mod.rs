mod keys;
mod scripts;
mod tv;

pub use keys::{cmd_keys_generate, cmd_keys_list, cmd_keys_stats};
pub use scripts::{cmd_scripts_add, cmd_scripts_list, cmd_scripts_remove};
pub use tv::{cmd_tv_holders, cmd_tv_validate};

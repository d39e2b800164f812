//! Engine settings
//!
//! - Settings: what to block and how the components are tuned
//! - SettingsLoader: built-in defaults merged with user and explicit files
//! - SettingsValidator: structural checks run after every load

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::SettingsLoader;
pub use schema::{
    default_dns_flush, default_hosts_path, CommonSettings, FirewallBackend, FirewallSettings,
    HostsSettings, MonitorSettings, Settings, StoreSettings,
};
pub use validator::SettingsValidator;

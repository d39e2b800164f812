//! Engine settings schema types

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete engine settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub common: CommonSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub firewall: FirewallSettings,
    #[serde(default)]
    pub hosts: HostsSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Settings shared by every component
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonSettings {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_config_version() -> String {
    "1.0".to_string()
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            verbose: false,
        }
    }
}

/// Config Store tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Explicit location of the JSON record; the per-user data directory is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_watch_interval_ms() -> u64 {
    250
}

impl StoreSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            cache_ttl_ms: default_cache_ttl_ms(),
            debounce_ms: default_debounce_ms(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

/// Which firewall facility rules are written to
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FirewallBackend {
    /// Windows Filtering Platform through `netsh advfirewall`
    Netsh,
    /// Keep rules in memory and only log what would be done
    DryRun,
}

/// Firewall Policy Manager settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallSettings {
    #[serde(default = "default_backend")]
    pub backend: FirewallBackend,
    /// Firewall control utility
    #[serde(default = "default_program")]
    pub program: String,
    /// Prefix of rules created from the fixed target list and wildcard matches
    #[serde(default = "default_block_prefix")]
    pub block_prefix: String,
    /// Prefix of rules created by the process watcher
    #[serde(default = "default_monitor_prefix")]
    pub monitor_prefix: String,
    /// Executable names blocked by first match across the search roots
    #[serde(default)]
    pub targets: IndexSet<String>,
    /// Executable-name glob; every match under every root is blocked
    #[serde(default)]
    pub wildcard: Option<String>,
    /// Secondary search root (e.g. a license server install directory)
    #[serde(default)]
    pub secondary_root: Option<PathBuf>,
    /// Environment variable consulted when `secondary_root` is unset
    #[serde(default)]
    pub secondary_root_env: Option<String>,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_backend() -> FirewallBackend {
    if cfg!(windows) {
        FirewallBackend::Netsh
    } else {
        FirewallBackend::DryRun
    }
}

fn default_program() -> String {
    "netsh".to_string()
}

fn default_block_prefix() -> String {
    "NetFence_Block_".to_string()
}

fn default_monitor_prefix() -> String {
    "NetFence_Monitor_".to_string()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

impl FirewallSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Every prefix under which this system owns rules
    pub fn owned_prefixes(&self) -> [&str; 2] {
        [&self.block_prefix, &self.monitor_prefix]
    }
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            program: default_program(),
            block_prefix: default_block_prefix(),
            monitor_prefix: default_monitor_prefix(),
            targets: IndexSet::new(),
            wildcard: None,
            secondary_root: None,
            secondary_root_env: None,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// Hosts Blocklist Manager settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostsSettings {
    /// Hosts file location; the platform default is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_marker_start")]
    pub marker_start: String,
    #[serde(default = "default_marker_end")]
    pub marker_end: String,
    #[serde(default = "default_sinkhole")]
    pub sinkhole: String,
    #[serde(default)]
    pub domains: IndexSet<String>,
    /// Command that invalidates the OS resolver cache; the platform default is used when unset
    #[serde(default)]
    pub dns_flush: Option<Vec<String>>,
    #[serde(default = "default_dns_flush_timeout_ms")]
    pub dns_flush_timeout_ms: u64,
}

fn default_marker_start() -> String {
    "# NetFence Domain Block Start".to_string()
}

fn default_marker_end() -> String {
    "# NetFence Domain Block End".to_string()
}

fn default_sinkhole() -> String {
    "127.0.0.1".to_string()
}

fn default_dns_flush_timeout_ms() -> u64 {
    5_000
}

/// Platform hosts file
pub fn default_hosts_path() -> PathBuf {
    if cfg!(windows) {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Platform resolver cache flush command
pub fn default_dns_flush() -> Vec<String> {
    if cfg!(windows) {
        vec!["ipconfig".to_string(), "/flushdns".to_string()]
    } else {
        vec!["resolvectl".to_string(), "flush-caches".to_string()]
    }
}

impl HostsSettings {
    pub fn hosts_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_hosts_path)
    }

    pub fn dns_flush_command(&self) -> Vec<String> {
        self.dns_flush.clone().unwrap_or_else(default_dns_flush)
    }

    pub fn dns_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_flush_timeout_ms)
    }
}

impl Default for HostsSettings {
    fn default() -> Self {
        Self {
            path: None,
            marker_start: default_marker_start(),
            marker_end: default_marker_end(),
            sinkhole: default_sinkhole(),
            domains: IndexSet::new(),
            dns_flush: None,
            dns_flush_timeout_ms: default_dns_flush_timeout_ms(),
        }
    }
}

/// Process event source settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Directory name whose nearest ancestor of the install path becomes the monitored root
    #[serde(default)]
    pub root_ancestor: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            root_ancestor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.store.cache_ttl(), Duration::from_secs(30));
        assert_eq!(settings.store.debounce(), Duration::from_millis(500));
        assert_ne!(settings.firewall.block_prefix, settings.firewall.monitor_prefix);
        assert_eq!(settings.hosts.sinkhole, "127.0.0.1");
    }

    #[test]
    fn test_parse_backend() {
        let toml_str = r#"
[firewall]
backend = "dry-run"
targets = ["a.exe", "b.exe", "a.exe"]
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.firewall.backend, FirewallBackend::DryRun);
        // IndexSet drops the duplicate but keeps declaration order
        let targets: Vec<_> = settings.firewall.targets.iter().cloned().collect();
        assert_eq!(targets, vec!["a.exe", "b.exe"]);
    }
}

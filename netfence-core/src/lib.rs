//! netfence-core - Network isolation and state reconciliation
//!
//! This library keeps an application's network access in line with persisted
//! user intent:
//! - Config Store: the JSON record of what the user asked for
//! - Firewall Policy: outbound block rules for the application's executables
//! - Hosts Blocklist: a sinkhole section in the hosts file
//!
//! Every component talks to external state (rule table, hosts file, config
//! file) and is safe to call repeatedly; callers converge by retrying.

pub mod command;
pub mod context;
pub mod error;
pub mod executor;
pub mod firewall;
pub mod hosts;
pub mod resolver;
pub mod settings;
pub mod store;

pub use context::FenceContext;
pub use error::{ErrorKind, FenceError, Result};
pub use executor::{BlockRule, DryRunExecutor, NetshExecutor, RuleExecutor};
pub use firewall::{ApplyReport, FirewallPolicy, RemoveReport, RuleStatus};
pub use hosts::{DomainStatus, HostsBlocklist};
pub use resolver::{FixedPathResolver, PathResolver, SettingsPathResolver};
pub use settings::{Settings, SettingsLoader};
pub use store::{ConfigRecord, ConfigStore, StoreStats};

//! Outbound block rules and the executors that materialise them
//!
//! An executor owns no state of its own: the external firewall rule table is
//! the source of truth and every call goes to it.

pub mod dry_run;
pub mod netsh;

pub use dry_run::DryRunExecutor;
pub use netsh::NetshExecutor;

use crate::error::Result;
use crate::settings::{FirewallBackend, FirewallSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A named rule preventing one executable from opening outbound connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    /// Unique name in the firewall rule table (compared case-insensitively)
    pub name: String,
    /// Absolute path of the blocked executable
    pub program: PathBuf,
}

impl BlockRule {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }

    /// Rule for `program` named `prefix` + its file name without extension
    pub fn for_executable(prefix: &str, program: &Path) -> Self {
        let file_name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(rule_name(prefix, &file_name), program)
    }
}

/// Derive the canonical rule name for an executable name such as `tool.exe`
pub fn rule_name(prefix: &str, executable: &str) -> String {
    let stem = Path::new(executable)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string());
    format!("{}{}", prefix, stem)
}

/// Case-insensitive prefix test used for rule ownership
pub fn has_prefix(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Synchronous access to an external firewall rule table
pub trait RuleExecutor: Send + Sync {
    /// Create an outbound block rule
    fn add_block_rule(&self, rule: &BlockRule) -> Result<()>;

    /// Delete every rule with this name; deleting an absent rule succeeds
    fn delete_rule(&self, name: &str) -> Result<()>;

    /// Whether a rule with this name exists right now
    fn rule_exists(&self, name: &str) -> Result<bool>;

    /// Names of all rules starting with `prefix`, compared case-insensitively
    fn list_rules(&self, prefix: &str) -> Result<Vec<String>>;

    /// Short backend name for logs and status output
    fn backend_name(&self) -> &'static str;
}

/// Build the executor selected by the settings
pub fn from_settings(settings: &FirewallSettings) -> Arc<dyn RuleExecutor> {
    match settings.backend {
        FirewallBackend::Netsh => Arc::new(NetshExecutor::new(
            settings.program.clone(),
            settings.command_timeout(),
        )),
        FirewallBackend::DryRun => Arc::new(DryRunExecutor::new()),
    }
}

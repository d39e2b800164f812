//! Firewall Policy Manager
//!
//! Turns the configured target list into outbound block rules under an
//! install root. The firewall rule table is the only state: every query goes
//! to the executor and `apply_block` can be repeated until it converges.

pub mod discovery;

use self::discovery::{find_first, find_matching, same_path, search_roots, NamePattern};
use crate::error::{FenceError, Result};
use crate::executor::{rule_name, BlockRule, RuleExecutor};
use crate::resolver::PathResolver;
use crate::settings::FirewallSettings;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A rule that could not be created or deleted
#[derive(Debug, Clone, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub error: String,
}

/// Outcome of one `apply_block` pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Rules created by this pass
    pub created: Vec<String>,
    /// Rules that were already present
    pub existing: Vec<String>,
    /// Fixed targets not found under any root (not a failure)
    pub missing: Vec<String>,
    pub failed: Vec<RuleFailure>,
}

impl ApplyReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of one `remove_block` pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    pub failed: Vec<RuleFailure>,
}

impl RemoveReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStatus {
    pub count: usize,
    pub names: Vec<String>,
}

/// Rules derived from the executables found under the search roots
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub rules: Vec<BlockRule>,
    pub missing: Vec<String>,
}

/// Assigns rule names, adding `_2`, `_3`, ... when different executables share a stem
#[derive(Default)]
struct NamePlanner {
    // lowercased rule name -> program it was assigned to
    assigned: HashMap<String, PathBuf>,
}

impl NamePlanner {
    /// `None` when `program` already has a rule in this plan
    fn assign(&mut self, prefix: &str, program: &Path) -> Option<String> {
        let file_name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = rule_name(prefix, &file_name);

        let mut suffix = 1;
        loop {
            let candidate = if suffix == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, suffix)
            };
            match self.assigned.get(&candidate.to_lowercase()) {
                Some(existing) if same_path(existing, program) => return None,
                Some(_) => suffix += 1,
                None => {
                    self.assigned
                        .insert(candidate.to_lowercase(), program.to_path_buf());
                    return Some(candidate);
                }
            }
        }
    }
}

pub struct FirewallPolicy {
    executor: Arc<dyn RuleExecutor>,
    resolver: Arc<dyn PathResolver>,
    settings: FirewallSettings,
    wildcard: Option<NamePattern>,
    // serializes apply/remove passes within this process
    guard: Mutex<()>,
}

impl FirewallPolicy {
    pub fn new(
        settings: FirewallSettings,
        executor: Arc<dyn RuleExecutor>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        let wildcard = settings.wildcard.as_deref().map(NamePattern::new);
        Self {
            executor,
            resolver,
            settings,
            wildcard,
            guard: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &FirewallSettings {
        &self.settings
    }

    /// Work out which rules `apply_block` would ensure for `install_root`
    pub fn discover(&self, install_root: &Path) -> Result<Discovery> {
        if !install_root.is_dir() {
            return Err(FenceError::RootNotFound(install_root.to_path_buf()));
        }

        let roots = search_roots(install_root, self.resolver.secondary_root());
        tracing::debug!("Searching {:?} for block targets", roots);

        let prefix = &self.settings.block_prefix;
        let mut planner = NamePlanner::default();
        let mut discovery = Discovery::default();

        for target in &self.settings.targets {
            match find_first(&roots, target) {
                Some(program) => {
                    if let Some(name) = planner.assign(prefix, &program) {
                        discovery.rules.push(BlockRule::new(name, program));
                    }
                }
                None => {
                    tracing::debug!("Target {} not found", target);
                    discovery.missing.push(target.clone());
                }
            }
        }

        if let Some(pattern) = &self.wildcard {
            for program in find_matching(&roots, pattern) {
                if let Some(name) = planner.assign(prefix, &program) {
                    discovery.rules.push(BlockRule::new(name, program));
                }
            }
        }

        Ok(discovery)
    }

    /// Ensure a block rule exists for every target found under `install_root`
    ///
    /// Individual rule failures are collected in the report; the pass always
    /// continues with the remaining rules.
    pub fn apply_block(&self, install_root: &Path) -> Result<ApplyReport> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        let discovery = self.discover(install_root)?;
        let mut report = ApplyReport {
            missing: discovery.missing,
            ..Default::default()
        };

        for rule in discovery.rules {
            match self.executor.rule_exists(&rule.name) {
                Ok(true) => {
                    tracing::debug!(rule = %rule.name, "Rule already present");
                    report.existing.push(rule.name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(rule = %rule.name, "Could not query rule, adding anyway: {}", e);
                }
            }

            match self.executor.add_block_rule(&rule) {
                Ok(()) => {
                    tracing::info!(
                        rule = %rule.name,
                        program = %rule.program.display(),
                        "Added outbound block rule"
                    );
                    report.created.push(rule.name);
                }
                Err(e) => {
                    tracing::error!(rule = %rule.name, "Failed to add rule: {}", e);
                    report.failed.push(RuleFailure {
                        rule: rule.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Delete every rule this system owns, static and watcher-created
    pub fn remove_block(&self) -> RemoveReport {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = RemoveReport::default();

        for prefix in self.settings.owned_prefixes() {
            let names = match self.executor.list_rules(prefix) {
                Ok(names) => names,
                Err(e) => {
                    tracing::error!("Failed to list rules under {}: {}", prefix, e);
                    report.failed.push(RuleFailure {
                        rule: format!("{}*", prefix),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for name in names {
                match self.executor.delete_rule(&name) {
                    Ok(()) => {
                        tracing::info!(rule = %name, "Removed rule");
                        report.removed.push(name);
                    }
                    Err(e) => {
                        tracing::error!(rule = %name, "Failed to remove rule: {}", e);
                        report.failed.push(RuleFailure {
                            rule: name,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    pub fn rule_exists(&self, name: &str) -> Result<bool> {
        self.executor.rule_exists(name)
    }

    /// Names of all rules owned by this system, block rules first
    pub fn list_existing_rules(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for prefix in self.settings.owned_prefixes() {
            names.extend(self.executor.list_rules(prefix)?);
        }
        Ok(names)
    }

    pub fn has_active_rules(&self) -> Result<bool> {
        Ok(!self.list_existing_rules()?.is_empty())
    }

    pub fn get_status(&self) -> Result<RuleStatus> {
        let names = self.list_existing_rules()?;
        Ok(RuleStatus {
            count: names.len(),
            names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;
    use crate::resolver::FixedPathResolver;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    fn settings() -> FirewallSettings {
        let mut settings = FirewallSettings {
            block_prefix: "NF_Block_".to_string(),
            monitor_prefix: "NF_Monitor_".to_string(),
            wildcard: Some("svc*.exe".to_string()),
            ..Default::default()
        };
        settings.targets.insert("tool.exe".to_string());
        settings.targets.insert("server.exe".to_string());
        settings
    }

    fn policy(executor: Arc<dyn RuleExecutor>, secondary: Option<PathBuf>) -> FirewallPolicy {
        FirewallPolicy::new(settings(), executor, Arc::new(FixedPathResolver(secondary)))
    }

    /// Fails to create rules whose name contains `needle`
    struct FailingExecutor {
        inner: DryRunExecutor,
        needle: &'static str,
    }

    impl RuleExecutor for FailingExecutor {
        fn add_block_rule(&self, rule: &BlockRule) -> Result<()> {
            if rule.name.contains(self.needle) {
                return Err(FenceError::CommandFailed {
                    program: "netsh".to_string(),
                    code: Some(1),
                    output: "boom".to_string(),
                });
            }
            self.inner.add_block_rule(rule)
        }

        fn delete_rule(&self, name: &str) -> Result<()> {
            self.inner.delete_rule(name)
        }

        fn rule_exists(&self, name: &str) -> Result<bool> {
            self.inner.rule_exists(name)
        }

        fn list_rules(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list_rules(prefix)
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_missing_root() {
        let policy = policy(Arc::new(DryRunExecutor::new()), None);
        let err = policy.apply_block(Path::new("/netfence/no/such/root")).unwrap_err();
        assert!(matches!(err, FenceError::RootNotFound(_)));
        assert_eq!(
            err.to_string(),
            "Directory does not exist: /netfence/no/such/root"
        );
    }

    #[test]
    fn test_missing_targets_are_not_failures() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "bin/tool.exe");

        let executor = Arc::new(DryRunExecutor::new());
        let report = policy(executor.clone(), None).apply_block(root.path()).unwrap();

        assert!(report.succeeded());
        assert_eq!(report.created, vec!["NF_Block_tool"]);
        assert_eq!(report.missing, vec!["server.exe"]);
        assert_eq!(executor.len(), 1);
    }

    #[test]
    fn test_secondary_root_is_searched() {
        let root = TempDir::new().unwrap();
        let license = TempDir::new().unwrap();
        touch(root.path(), "tool.exe");
        let server = touch(license.path(), "x/server.exe");
        touch(license.path(), "svc-lic.exe");

        let executor = Arc::new(DryRunExecutor::new());
        let policy = policy(executor.clone(), Some(license.path().to_path_buf()));
        let report = policy.apply_block(root.path()).unwrap();

        assert_eq!(
            report.created,
            vec!["NF_Block_tool", "NF_Block_server", "NF_Block_svc-lic"]
        );
        let rules = executor.rules();
        assert_eq!(rules[1].program, server);
    }

    #[test]
    fn test_wildcard_collisions_get_suffixes() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "a/svc-x.exe");
        touch(root.path(), "b/svc-x.exe");
        touch(root.path(), "svc-y.exe");

        let policy = policy(Arc::new(DryRunExecutor::new()), None);
        let discovery = policy.discover(root.path()).unwrap();
        let names: Vec<_> = discovery.rules.iter().map(|r| r.name.as_str()).collect();

        assert_eq!(names, vec!["NF_Block_svc-y", "NF_Block_svc-x", "NF_Block_svc-x_2"]);
    }

    #[test]
    fn test_target_matching_wildcard_is_planned_once() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "svc-main.exe");

        let mut settings = settings();
        settings.targets.insert("svc-main.exe".to_string());
        let policy = FirewallPolicy::new(
            settings,
            Arc::new(DryRunExecutor::new()),
            Arc::new(FixedPathResolver(None)),
        );

        let discovery = policy.discover(root.path()).unwrap();
        assert_eq!(discovery.rules.len(), 1);
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "bin/tool.exe");
        touch(root.path(), "bin/svc-a.exe");

        let executor = Arc::new(DryRunExecutor::new());
        let policy = policy(executor.clone(), None);

        let first = policy.apply_block(root.path()).unwrap();
        let second = policy.apply_block(root.path()).unwrap();

        assert_eq!(first.created.len(), 2);
        assert!(second.created.is_empty());
        assert_eq!(second.existing, first.created);
        assert!(second.succeeded());
        assert_eq!(executor.len(), 2);
    }

    #[test]
    fn test_single_failure_does_not_abort() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "tool.exe");
        touch(root.path(), "server.exe");
        touch(root.path(), "svc-a.exe");

        let executor = Arc::new(FailingExecutor {
            inner: DryRunExecutor::new(),
            needle: "server",
        });
        let report = policy(executor.clone(), None).apply_block(root.path()).unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].rule, "NF_Block_server");
        assert_eq!(report.created, vec!["NF_Block_tool", "NF_Block_svc-a"]);
    }

    #[test]
    fn test_remove_covers_both_prefixes() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "tool.exe");

        let executor = Arc::new(DryRunExecutor::new());
        let policy = policy(executor.clone(), None);
        policy.apply_block(root.path()).unwrap();
        executor
            .add_block_rule(&BlockRule::new("NF_Monitor_tool_42", root.path().join("tool.exe")))
            .unwrap();
        executor
            .add_block_rule(&BlockRule::new("Unrelated", "/bin/true"))
            .unwrap();

        let status = policy.get_status().unwrap();
        assert_eq!(status.count, 2);
        assert!(policy.has_active_rules().unwrap());

        let report = policy.remove_block();
        assert!(report.succeeded());
        assert_eq!(report.removed.len(), 2);
        assert!(!policy.has_active_rules().unwrap());
        assert!(policy.rule_exists("Unrelated").unwrap());
    }
}

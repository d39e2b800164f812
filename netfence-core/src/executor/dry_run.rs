//! In-memory rule table

use super::{has_prefix, BlockRule, RuleExecutor};
use crate::error::Result;
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keeps rules in memory and logs what a real backend would do
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    // keyed by lowercased rule name
    rules: Mutex<IndexMap<String, BlockRule>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, IndexMap<String, BlockRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every rule in creation order
    pub fn rules(&self) -> Vec<BlockRule> {
        self.table().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl RuleExecutor for DryRunExecutor {
    fn add_block_rule(&self, rule: &BlockRule) -> Result<()> {
        let mut rules = self.table();
        let key = rule.name.to_lowercase();
        if rules.contains_key(&key) {
            tracing::debug!(rule = %rule.name, "[dry-run] rule already present");
            return Ok(());
        }
        tracing::info!(
            rule = %rule.name,
            program = %rule.program.display(),
            "[dry-run] would add outbound block rule"
        );
        rules.insert(key, rule.clone());
        Ok(())
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        if self.table().shift_remove(&name.to_lowercase()).is_some() {
            tracing::info!(rule = %name, "[dry-run] would delete rule");
        }
        Ok(())
    }

    fn rule_exists(&self, name: &str) -> Result<bool> {
        Ok(self.table().contains_key(&name.to_lowercase()))
    }

    fn list_rules(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .table()
            .values()
            .filter(|rule| has_prefix(&rule.name, prefix))
            .map(|rule| rule.name.clone())
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "dry-run"
    }
}

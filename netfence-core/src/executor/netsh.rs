//! `netsh advfirewall` backend

use super::{has_prefix, BlockRule, RuleExecutor};
use crate::command::{CommandOutput, CommandRunner, TimeoutPolicy};
use crate::error::{FenceError, Result};
use indexmap::IndexSet;
use std::time::Duration;

/// Printed by `show rule` and `delete rule` when nothing has the given name
const NO_MATCH_MARKER: &str = "No rules match";

/// Key of the first line of every rule block in `show rule` output
const RULE_NAME_KEY: &str = "Rule Name";

pub struct NetshExecutor {
    program: String,
    runner: CommandRunner,
}

impl NetshExecutor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            runner: CommandRunner::new(timeout),
        }
    }

    fn add_args(rule: &BlockRule) -> Vec<String> {
        vec![
            "advfirewall".to_string(),
            "firewall".to_string(),
            "add".to_string(),
            "rule".to_string(),
            format!("name={}", rule.name),
            "dir=out".to_string(),
            "action=block".to_string(),
            format!("program={}", rule.program.display()),
            "enable=yes".to_string(),
        ]
    }

    fn rule_args(verb: &str, name: &str) -> Vec<String> {
        vec![
            "advfirewall".to_string(),
            "firewall".to_string(),
            verb.to_string(),
            "rule".to_string(),
            format!("name={}", name),
        ]
    }

    fn list_args() -> Vec<String> {
        let mut args = Self::rule_args("show", "all");
        args.push("dir=out".to_string());
        args
    }

    fn run(&self, args: Vec<String>, policy: TimeoutPolicy) -> Result<CommandOutput> {
        self.runner.run(&self.program, &args, policy)
    }

    /// Turn a non-zero exit into the matching error
    fn failure(&self, operation: &str, output: &CommandOutput) -> FenceError {
        let text = output.combined();
        if requires_elevation(&text) {
            FenceError::ElevationRequired {
                operation: operation.to_string(),
                output: text,
            }
        } else {
            FenceError::CommandFailed {
                program: self.program.clone(),
                code: output.code,
                output: text,
            }
        }
    }
}

impl RuleExecutor for NetshExecutor {
    fn add_block_rule(&self, rule: &BlockRule) -> Result<()> {
        tracing::debug!(rule = %rule.name, program = %rule.program.display(), "Adding block rule");
        let output = self.run(Self::add_args(rule), TimeoutPolicy::Detach)?;
        if output.success() {
            Ok(())
        } else {
            Err(self.failure("add rule", &output))
        }
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        tracing::debug!(rule = %name, "Deleting rule");
        let output = self.run(Self::rule_args("delete", name), TimeoutPolicy::Kill)?;
        if output.success() || output.combined().contains(NO_MATCH_MARKER) {
            Ok(())
        } else {
            Err(self.failure("delete rule", &output))
        }
    }

    fn rule_exists(&self, name: &str) -> Result<bool> {
        let output = self.run(Self::rule_args("show", name), TimeoutPolicy::Kill)?;
        let text = output.combined();
        if output.success() && !text.contains(NO_MATCH_MARKER) {
            return Ok(true);
        }
        if requires_elevation(&text) {
            return Err(self.failure("show rule", &output));
        }
        Ok(false)
    }

    fn list_rules(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self.run(Self::list_args(), TimeoutPolicy::Kill)?;
        if !output.success() {
            if output.combined().contains(NO_MATCH_MARKER) {
                return Ok(Vec::new());
            }
            return Err(self.failure("show rule", &output));
        }

        Ok(parse_rule_names(&output.stdout)
            .into_iter()
            .filter(|name| has_prefix(name, prefix))
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "netsh"
    }
}

/// Extract distinct rule names from `show rule` output, in listing order
///
/// A rule enabled for several profiles is listed once per profile.
pub(crate) fn parse_rule_names(output: &str) -> Vec<String> {
    let names: IndexSet<String> = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.trim() == RULE_NAME_KEY)
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    names.into_iter().collect()
}

fn requires_elevation(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("elevation") || lower.contains("administrator") || lower.contains("access is denied")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SHOW_OUTPUT: &str = "\r
Rule Name:                            NetFence_Block_tool\r
----------------------------------------------------------------------\r
Enabled:                              Yes\r
Direction:                            Out\r
Profiles:                             Domain,Private,Public\r
Action:                               Block\r
\r
Rule Name:                            Core Networking - DNS (UDP-Out)\r
----------------------------------------------------------------------\r
Enabled:                              Yes\r
\r
Rule Name:                            netfence_block_tool_2\r
----------------------------------------------------------------------\r
Enabled:                              Yes\r
\r
Rule Name:                            NetFence_Block_tool\r
----------------------------------------------------------------------\r
Profiles:                             Private\r
Ok.\r
";

    #[test]
    fn test_add_args() {
        let rule = BlockRule::new("NF_tool", PathBuf::from(r"C:\Apps\tool.exe"));
        let args = NetshExecutor::add_args(&rule);
        assert_eq!(&args[..4], &["advfirewall", "firewall", "add", "rule"]);
        assert!(args.contains(&"name=NF_tool".to_string()));
        assert!(args.contains(&"dir=out".to_string()));
        assert!(args.contains(&"action=block".to_string()));
        assert!(args.contains(&r"program=C:\Apps\tool.exe".to_string()));
    }

    #[test]
    fn test_list_args() {
        assert_eq!(
            NetshExecutor::list_args(),
            vec!["advfirewall", "firewall", "show", "rule", "name=all", "dir=out"]
        );
    }

    #[test]
    fn test_parse_rule_names_dedups() {
        let names = parse_rule_names(SHOW_OUTPUT);
        assert_eq!(
            names,
            vec![
                "NetFence_Block_tool",
                "Core Networking - DNS (UDP-Out)",
                "netfence_block_tool_2"
            ]
        );
    }

    #[test]
    fn test_parse_rule_names_empty() {
        assert!(parse_rule_names("No rules match the specified criteria.\r\n").is_empty());
    }

    #[test]
    fn test_requires_elevation() {
        assert!(requires_elevation(
            "The requested operation requires elevation (Run as administrator)."
        ));
        assert!(!requires_elevation("No rules match the specified criteria."));
    }

    #[test]
    fn test_failure_classification() {
        let executor = NetshExecutor::new("netsh", Duration::from_secs(1));
        let output = CommandOutput {
            code: Some(1),
            stdout: "The requested operation requires elevation (Run as administrator).".into(),
            stderr: String::new(),
        };
        let err = executor.failure("add rule", &output);
        assert!(err.is_permission());

        let output = CommandOutput {
            code: Some(1),
            stdout: "A specified value is not valid.".into(),
            stderr: String::new(),
        };
        assert!(matches!(
            executor.failure("add rule", &output),
            FenceError::CommandFailed { code: Some(1), .. }
        ));
    }

    #[test]
    fn test_missing_utility_is_an_error() {
        let executor = NetshExecutor::new("netfence-no-such-netsh", Duration::from_secs(1));
        let rule = BlockRule::new("NF_tool", PathBuf::from("/opt/tool"));
        assert!(matches!(
            executor.add_block_rule(&rule),
            Err(FenceError::CommandSpawn { .. })
        ));
        assert!(executor.rule_exists("NF_tool").is_err());
    }
}

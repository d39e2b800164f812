//! Resolver cache invalidation

use crate::command::{CommandRunner, TimeoutPolicy};
use std::time::Duration;

/// Runs the configured flush command after hosts file changes
#[derive(Debug, Clone)]
pub struct DnsFlusher {
    command: Vec<String>,
    runner: CommandRunner,
}

impl DnsFlusher {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            runner: CommandRunner::new(timeout),
        }
    }

    /// Flush the resolver cache. Failures are logged, never returned.
    pub fn flush(&self) -> bool {
        let Some((program, args)) = self.command.split_first() else {
            tracing::debug!("No DNS flush command configured");
            return false;
        };

        match self.runner.run(program, args, TimeoutPolicy::Kill) {
            Ok(output) if output.success() => {
                tracing::debug!("DNS cache flushed");
                true
            }
            Ok(output) => {
                tracing::warn!(
                    "DNS flush exited with {:?}: {}",
                    output.code,
                    output.combined()
                );
                false
            }
            Err(e) => {
                tracing::warn!("DNS flush failed: {}", e);
                false
            }
        }
    }
}

//! netfence-monitor - Process watching for netfence
//!
//! - ProcessSource: where process-creation events come from
//! - ProcfsSource: polls a procfs mount for new pids
//! - ToolhelpSource: polls ToolHelp process snapshots on Windows
//! - ProcessWatcher: blocks new processes under a monitored root

mod poll;
pub mod procfs;
pub mod source;
#[cfg(windows)]
pub mod toolhelp;
pub mod watcher;

pub use procfs::ProcfsSource;
pub use source::{ManualSource, ProcessEvent, ProcessSource, Subscription};
#[cfg(windows)]
pub use toolhelp::ToolhelpSource;
pub use watcher::{ProcessBlocked, ProcessWatcher};

use std::sync::Arc;
use std::time::Duration;

/// The polling source for the platform this binary runs on
#[cfg(windows)]
pub fn platform_source(poll_interval: Duration) -> Arc<dyn ProcessSource> {
    Arc::new(ToolhelpSource::new(poll_interval))
}

/// The polling source for the platform this binary runs on
#[cfg(not(windows))]
pub fn platform_source(poll_interval: Duration) -> Arc<dyn ProcessSource> {
    Arc::new(ProcfsSource::new(poll_interval))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(windows, target_os = "linux"))]
    #[test]
    fn test_platform_source_sees_this_process() {
        let source = platform_source(Duration::from_millis(10));
        let running = source.running().unwrap();
        assert!(running.iter().any(|p| p.pid == std::process::id()));
    }
}

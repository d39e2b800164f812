//! Process source backed by polling a procfs mount

use crate::poll::{self, Snapshot};
use crate::source::{ProcessEvent, ProcessSource, Subscription};
use netfence_core::{FenceError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Debug, Clone)]
pub struct ProcfsSource {
    proc_root: PathBuf,
    poll_interval: Duration,
}

impl ProcfsSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_root("/proc", poll_interval)
    }

    /// Read process entries from `proc_root` instead of `/proc`
    pub fn with_root(proc_root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            poll_interval,
        }
    }
}

impl Snapshot for ProcfsSource {
    fn pids(&self) -> Result<HashSet<u32>> {
        let entries = fs::read_dir(&self.proc_root).map_err(|e| {
            FenceError::ProcessSource(format!("cannot read {:?}: {}", self.proc_root, e))
        })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect())
    }

    fn describe(&self, pid: u32) -> ProcessEvent {
        let dir = self.proc_root.join(pid.to_string());
        let path = fs::read_link(dir.join("exe")).ok();
        let name = fs::read_to_string(dir.join("comm"))
            .ok()
            .map(|comm| comm.trim_end().to_string())
            .filter(|comm| !comm.is_empty())
            .or_else(|| {
                path.as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        ProcessEvent::new(pid, name, path)
    }
}

impl ProcessSource for ProcfsSource {
    fn running(&self) -> Result<Vec<ProcessEvent>> {
        let mut pids: Vec<u32> = self.pids()?.into_iter().collect();
        pids.sort_unstable();
        Ok(pids.into_iter().map(|pid| self.describe(pid)).collect())
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        fs::read_link(self.proc_root.join(pid.to_string()).join("exe")).ok()
    }

    fn subscribe(&self, runtime: &Handle) -> Result<Subscription> {
        poll::subscribe(self.clone(), self.poll_interval, runtime)
    }
}

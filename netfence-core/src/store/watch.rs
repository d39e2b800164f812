//! Polling change detection for a single file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    exists: bool,
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                modified: meta.modified().ok(),
                len: meta.len(),
            },
            Err(_) => Self {
                exists: false,
                modified: None,
                len: 0,
            },
        }
    }
}

#[derive(Debug)]
struct WatchState {
    baseline: Fingerprint,
    suspended: bool,
}

/// Detects modification and deletion of one file by comparing metadata snapshots
///
/// The state mutex is held across stat and compare, so a `suspend()` either
/// happens before a poll or after it, never in the middle.
#[derive(Debug)]
pub struct FileWatch {
    path: PathBuf,
    state: Mutex<WatchState>,
}

impl FileWatch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let baseline = Fingerprint::of(&path);
        Self {
            path,
            state: Mutex::new(WatchState {
                baseline,
                suspended: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when the file changed since the last poll or resume
    pub fn poll(&self) -> bool {
        let mut state = self.lock();
        if state.suspended {
            return false;
        }
        let current = Fingerprint::of(&self.path);
        if current != state.baseline {
            state.baseline = current;
            true
        } else {
            false
        }
    }

    /// Ignore changes until the returned guard is dropped
    ///
    /// Dropping the guard takes a fresh baseline, so the writer's own change
    /// is never reported.
    pub fn suspend(&self) -> Suspended<'_> {
        self.lock().suspended = true;
        Suspended { watch: self }
    }

    fn resume(&self) {
        let mut state = self.lock();
        state.baseline = Fingerprint::of(&self.path);
        state.suspended = false;
    }
}

pub struct Suspended<'a> {
    watch: &'a FileWatch,
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        self.watch.resume();
    }
}

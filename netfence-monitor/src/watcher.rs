//! Process Watcher
//!
//! While monitoring a root directory, every process whose executable lives
//! under that root gets its own outbound block rule, once per path per
//! session. Sessions are Idle -> Monitoring -> Idle; a restart is a full stop
//! followed by a fresh start.

use crate::source::{ProcessEvent, ProcessSource, Subscription};
use chrono::{DateTime, Utc};
use netfence_core::executor::{rule_name, BlockRule, RuleExecutor};
use netfence_core::{FenceError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const NOTIFICATION_CAPACITY: usize = 64;

/// Raised after a rule was created for a newly seen process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessBlocked {
    pub name: String,
    pub path: PathBuf,
    pub pid: u32,
    pub rule: String,
    pub blocked_at: DateTime<Utc>,
}

enum Phase {
    Idle,
    Monitoring {
        root: PathBuf,
        // lowercased root without trailing separators
        root_key: String,
        session: u64,
        dispatch: JoinHandle<()>,
    },
}

struct State {
    phase: Phase,
    session: u64,
    // lowercased executable paths blocked this session
    blocked: HashSet<String>,
}

struct Shared {
    executor: Arc<dyn RuleExecutor>,
    source: Arc<dyn ProcessSource>,
    monitor_prefix: String,
    runtime: Handle,
    notify: broadcast::Sender<ProcessBlocked>,
    state: Mutex<State>,
}

/// Blocks processes started under a monitored root
#[derive(Clone)]
pub struct ProcessWatcher {
    shared: Arc<Shared>,
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Case-insensitive, component-aware "path is `root` or below it"
fn is_under(path_key: &str, root_key: &str) -> bool {
    match path_key.strip_prefix(root_key) {
        Some("") => true,
        Some(rest) => rest.starts_with(['/', '\\']) || root_key.ends_with(['/', '\\']),
        None => false,
    }
}

impl ProcessWatcher {
    pub fn new(
        executor: Arc<dyn RuleExecutor>,
        source: Arc<dyn ProcessSource>,
        monitor_prefix: impl Into<String>,
        runtime: Handle,
    ) -> Self {
        let (notify, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                executor,
                source,
                monitor_prefix: monitor_prefix.into(),
                runtime,
                notify,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    session: 0,
                    blocked: HashSet::new(),
                }),
            }),
        }
    }

    /// Receive a `ProcessBlocked` for every rule created from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessBlocked> {
        self.shared.notify.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self.shared.state().phase, Phase::Monitoring { .. })
    }

    pub fn monitored_root(&self) -> Option<PathBuf> {
        match &self.shared.state().phase {
            Phase::Monitoring { root, .. } => Some(root.clone()),
            Phase::Idle => None,
        }
    }

    /// Paths blocked during the current session
    pub fn blocked_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.shared.state().blocked.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Start a fresh session rooted at `root`
    ///
    /// Any running session is stopped first. Processes already running under
    /// the root are blocked before this returns.
    pub fn start_monitoring(&self, root: &Path) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state();

        // the old session ends even if the new root is rejected
        end_session(&mut state);
        if !root.is_dir() {
            return Err(FenceError::RootNotFound(root.to_path_buf()));
        }

        // subscribe before the sweep so nothing started in between is lost
        let subscription = shared.source.subscribe(&shared.runtime)?;

        state.session += 1;
        let session = state.session;
        state.blocked.clear();

        let root_key = path_key(root).trim_end_matches(['/', '\\']).to_string();
        let root_key = if root_key.is_empty() {
            MAIN_SEPARATOR.to_string()
        } else {
            root_key
        };

        match shared.source.running() {
            Ok(processes) => {
                let mut swept = 0;
                for process in processes {
                    if shared.block_if_new(&mut state, &root_key, process).is_some() {
                        swept += 1;
                    }
                }
                tracing::info!("Initial sweep blocked {} running processes", swept);
            }
            Err(e) => tracing::warn!("Initial process sweep failed: {}", e),
        }

        let dispatch = spawn_dispatch(
            &shared.runtime,
            Arc::downgrade(shared),
            subscription,
            session,
        );
        state.phase = Phase::Monitoring {
            root: root.to_path_buf(),
            root_key,
            session,
            dispatch,
        };

        tracing::info!("Process monitoring started for {:?}", root);
        Ok(())
    }

    /// End the session; rules created during it stay in place
    pub fn stop_monitoring(&self) {
        end_session(&mut self.shared.state());
    }

    /// Handle one creation event synchronously
    ///
    /// Events are ignored unless a session is active.
    pub fn handle_event(&self, event: ProcessEvent) -> Option<ProcessBlocked> {
        let session = match &self.shared.state().phase {
            Phase::Monitoring { session, .. } => *session,
            Phase::Idle => return None,
        };
        self.shared.handle_event(session, event)
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, session: u64, event: ProcessEvent) -> Option<ProcessBlocked> {
        let mut state = self.state();
        let root_key = match &state.phase {
            Phase::Monitoring {
                root_key,
                session: current,
                ..
            } if *current == session => root_key.clone(),
            // stale event from a previous session
            _ => return None,
        };
        self.block_if_new(&mut state, &root_key, event)
    }

    /// Create a rule for `event` if it runs from under the root and is not yet blocked
    fn block_if_new(
        &self,
        state: &mut State,
        root_key: &str,
        event: ProcessEvent,
    ) -> Option<ProcessBlocked> {
        let path = match event.path.or_else(|| self.source.executable_path(event.pid)) {
            Some(path) => path,
            None => {
                tracing::trace!("Cannot resolve executable of pid {}; dropping", event.pid);
                return None;
            }
        };

        let key = path_key(&path);
        if !is_under(&key, root_key) || state.blocked.contains(&key) {
            return None;
        }

        let name = if event.name.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            event.name
        };
        let rule = BlockRule::new(
            format!("{}_{}", rule_name(&self.monitor_prefix, &name), event.pid),
            path,
        );

        if let Err(e) = self.executor.add_block_rule(&rule) {
            tracing::warn!(rule = %rule.name, "Failed to block process {}: {}", event.pid, e);
            return None;
        }

        state.blocked.insert(key);
        tracing::info!(
            rule = %rule.name,
            pid = event.pid,
            "Blocked process {:?}",
            rule.program
        );

        let blocked = ProcessBlocked {
            name,
            path: rule.program,
            pid: event.pid,
            rule: rule.name,
            blocked_at: Utc::now(),
        };
        // no receivers is fine
        let _ = self.notify.send(blocked.clone());
        Some(blocked)
    }
}

fn end_session(state: &mut State) {
    let phase = std::mem::replace(&mut state.phase, Phase::Idle);
    if let Phase::Monitoring { root, dispatch, .. } = phase {
        dispatch.abort();
        state.blocked.clear();
        tracing::info!("Process monitoring stopped for {:?}", root);
    }
}

/// Forward events from the subscription to the blocking handler until stopped
fn spawn_dispatch(
    runtime: &Handle,
    shared: Weak<Shared>,
    mut subscription: Subscription,
    session: u64,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(target) = shared.upgrade() else {
                break;
            };
            let result =
                tokio::task::spawn_blocking(move || target.handle_event(session, event)).await;
            if let Err(e) = result {
                tracing::error!("Process event handler panicked: {}", e);
            }
        }
        tracing::debug!("Process event stream ended for session {}", session);
    })
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Phase::Monitoring { dispatch, .. } = &state.phase {
            dispatch.abort();
        }
    }
}

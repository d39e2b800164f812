//! Process event sources

use netfence_core::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

/// Capacity of the per-subscription event queue
pub const EVENT_QUEUE: usize = 256;

/// A process that was started, or is running at sweep time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub pid: u32,
    pub name: String,
    /// Executable path when the source could read it
    pub path: Option<PathBuf>,
}

impl ProcessEvent {
    pub fn new(pid: u32, name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            pid,
            name: name.into(),
            path,
        }
    }
}

/// Live stream of process-creation events
///
/// Dropping the subscription tells the source to stop producing.
pub struct Subscription {
    events: mpsc::Receiver<ProcessEvent>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ProcessEvent>) -> Self {
        Self {
            events,
            shutdown: None,
        }
    }

    /// Subscription whose producer also listens for an explicit shutdown signal
    pub fn with_shutdown(
        events: mpsc::Receiver<ProcessEvent>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
        }
    }

    /// Next event; `None` once the source has stopped
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            let _ = shutdown.send(true);
        }
    }
}

/// Where the process watcher learns about processes
pub trait ProcessSource: Send + Sync {
    /// Snapshot of the processes running now
    fn running(&self) -> Result<Vec<ProcessEvent>>;

    /// Executable path of a live process; `None` if it has exited or cannot be read
    fn executable_path(&self, pid: u32) -> Option<PathBuf>;

    /// Start delivering creation events for processes started from now on
    fn subscribe(&self, runtime: &Handle) -> Result<Subscription>;
}

/// A source fed by the embedding application
///
/// Useful when process notifications come from a platform facility the
/// application already listens to.
#[derive(Debug, Default)]
pub struct ManualSource {
    running: Mutex<Vec<ProcessEvent>>,
    paths: Mutex<HashMap<u32, PathBuf>>,
    subscribers: Mutex<Vec<mpsc::Sender<ProcessEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot returned by `running`
    pub fn set_running(&self, processes: Vec<ProcessEvent>) {
        *lock(&self.running) = processes;
    }

    /// Make `executable_path` answer for `pid`
    pub fn set_path(&self, pid: u32, path: impl Into<PathBuf>) {
        lock(&self.paths).insert(pid, path.into());
    }

    /// Deliver an event to every live subscription; returns how many received it
    pub fn emit(&self, event: ProcessEvent) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());

        let mut delivered = 0;
        for tx in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Dropping process event for pid {}: {}", event.pid, e),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl ProcessSource for ManualSource {
    fn running(&self) -> Result<Vec<ProcessEvent>> {
        Ok(lock(&self.running).clone())
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        lock(&self.paths).get(&pid).cloned()
    }

    fn subscribe(&self, _runtime: &Handle) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        lock(&self.subscribers).push(tx);
        Ok(Subscription::new(rx))
    }
}

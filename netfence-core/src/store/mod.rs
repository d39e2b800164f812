//! Config Store
//!
//! Persists the [`ConfigRecord`] as JSON with:
//! - an in-memory cache valid for `cache_ttl`
//! - debounced writes: a burst of saves produces one disk write of the last record
//! - atomic replace through a temp file in the same directory
//! - cache invalidation when the file is modified or deleted by someone else
//!
//! Background work runs on the tokio runtime handed to [`ConfigStore::open`];
//! the public API itself is synchronous.

pub mod record;
pub mod watch;

pub use record::ConfigRecord;

use self::record::{normalize_language, normalize_port};
use self::watch::FileWatch;
use crate::error::{FenceError, Result};
use crate::settings::StoreSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Disk write counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub disk_writes: u64,
    pub last_write: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    cached: Option<(ConfigRecord, Instant)>,
    // single slot: only the latest scheduled write survives
    pending: Option<ConfigRecord>,
    timer: Option<JoinHandle<()>>,
    stats: StoreStats,
}

struct Inner {
    path: PathBuf,
    cache_ttl: Duration,
    debounce: Duration,
    state: Mutex<State>,
    // serializes disk writes between the timer, flush and drop
    write_lock: Mutex<()>,
    watch: FileWatch,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

/// Handle to the persisted configuration record; clones share one cache
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl ConfigStore {
    /// Open the store at `path`, creating its directory and starting the change watcher
    pub fn open(settings: &StoreSettings, path: impl Into<PathBuf>, runtime: Handle) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| FenceError::write(dir, e))?;
        }

        let inner = Arc::new(Inner {
            watch: FileWatch::new(&path),
            path,
            cache_ttl: settings.cache_ttl(),
            debounce: settings.debounce(),
            state: Mutex::new(State::default()),
            write_lock: Mutex::new(()),
            watch_task: Mutex::new(None),
            runtime,
        });

        let task = spawn_watch(&inner, settings.watch_interval());
        *lock(&inner.watch_task) = Some(task);

        tracing::debug!("Config store opened at {:?}", inner.path);
        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn exists(&self) -> bool {
        self.inner.path.exists()
    }

    /// Current record; never fails
    ///
    /// Served from the cache while it is fresh. A missing file yields the
    /// default record (cached); an unreadable or malformed file yields the
    /// default record without caching it.
    pub fn load(&self) -> ConfigRecord {
        let mut state = self.inner.state();

        if let Some((record, cached_at)) = &state.cached {
            if cached_at.elapsed() < self.inner.cache_ttl {
                return record.clone();
            }
        }
        // a scheduled write is newer than anything on disk
        if let Some(pending) = &state.pending {
            return pending.clone();
        }

        match fs::read_to_string(&self.inner.path) {
            Ok(text) => match serde_json::from_str::<ConfigRecord>(&text) {
                Ok(mut record) => {
                    record.sanitize();
                    state.cached = Some((record.clone(), Instant::now()));
                    record
                }
                Err(e) => {
                    tracing::warn!("Malformed config {:?}, using defaults: {}", self.inner.path, e);
                    ConfigRecord::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let record = ConfigRecord::default();
                state.cached = Some((record.clone(), Instant::now()));
                record
            }
            Err(e) => {
                tracing::warn!("Failed to read config {:?}, using defaults: {}", self.inner.path, e);
                ConfigRecord::default()
            }
        }
    }

    /// Update the cache now and schedule a debounced write
    ///
    /// A save within the debounce window of a previous one replaces it and
    /// restarts the timer. An invalid record is rejected and nothing changes.
    pub fn save(&self, mut record: ConfigRecord) -> Result<()> {
        record.validate()?;

        let mut state = self.inner.state();
        state.cached = Some((record.clone(), Instant::now()));
        state.pending = Some(record);

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.debounce;
        state.timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let result = tokio::task::spawn_blocking(move || inner.write_pending()).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Debounced config write failed: {}", e),
                Err(e) => tracing::error!("Debounced config write panicked: {}", e),
            }
        }));
        Ok(())
    }

    /// Write any pending record now
    pub fn flush(&self) -> Result<()> {
        if let Some(timer) = self.inner.state().timer.take() {
            timer.abort();
        }
        self.inner.write_pending().map(|_| ())
    }

    pub fn update_selected_version(&self, name: &str, path: &str) -> Result<()> {
        let mut record = self.load();
        record.selected_version = name.to_string();
        record.selected_version_path = path.to_string();
        self.save(record)
    }

    pub fn update_network_blocked(&self, blocked: bool) -> Result<()> {
        let mut record = self.load();
        record.network_blocked = blocked;
        self.save(record)
    }

    /// Fails with `InvalidValue` unless `port` is a port number
    pub fn update_license_port(&self, port: &str) -> Result<()> {
        let mut record = self.load();
        record.license_port = normalize_port(port)?;
        self.save(record)
    }

    /// Fails with `InvalidValue` unless `language` is one of [`record::SUPPORTED_LANGUAGES`]
    pub fn update_language(&self, language: &str) -> Result<()> {
        let mut record = self.load();
        record.language = normalize_language(language)?;
        self.save(record)
    }

    /// Drop the cache and any pending write, then remove the file
    pub fn delete(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            state.cached = None;
            state.pending = None;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }

        let _write = lock(&self.inner.write_lock);
        let _suspended = self.inner.watch.suspend();
        match fs::remove_file(&self.inner.path) {
            Ok(()) => {
                tracing::info!("Deleted config {:?}", self.inner.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FenceError::write(&self.inner.path, e)),
        }
    }

    /// Forget the cached record so the next `load` reads the file
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.state().stats.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_watch(inner: &Arc<Inner>, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.watch.poll() {
                tracing::debug!("Config {:?} changed externally", inner.path);
                inner.invalidate();
            }
        }
    })
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn invalidate(&self) {
        self.state().cached = None;
    }

    /// Take the pending record and write it; `Ok(false)` when nothing was pending
    fn write_pending(&self) -> Result<bool> {
        let _write = lock(&self.write_lock);

        let Some(record) = self.state().pending.take() else {
            return Ok(false);
        };

        if let Err(e) = self.write_record(&record) {
            tracing::error!("Failed to write config {:?}: {}", self.path, e);
            return Err(e);
        }

        let mut state = self.state();
        state.stats.disk_writes += 1;
        state.stats.last_write = Some(Utc::now());
        tracing::debug!("Config written to {:?}", self.path);
        Ok(true)
    }

    /// Temp file in the same directory, then replace the real file with the watcher suspended
    fn write_record(&self, record: &ConfigRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| FenceError::write(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| FenceError::write(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| FenceError::write(tmp.path(), e))?;

        let _suspended = self.watch.suspend();
        tmp.persist(&self.path)
            .map_err(|e| FenceError::write(&self.path, e.error))?;
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.watch_task).take() {
            task.abort();
        }
        if let Some(timer) = self.state().timer.take() {
            timer.abort();
        }
        if let Err(e) = self.write_pending() {
            tracing::error!("Failed to flush config on shutdown: {}", e);
        }
    }
}

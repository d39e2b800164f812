use netfence_core::executor::{BlockRule, RuleExecutor};
use netfence_core::{DryRunExecutor, FenceError, Result};
use netfence_monitor::{ManualSource, ProcessEvent, ProcessWatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::TryRecvError;

const PREFIX: &str = "NetFence_Monitor_";

fn setup() -> (Arc<DryRunExecutor>, Arc<ManualSource>, ProcessWatcher) {
    let executor = Arc::new(DryRunExecutor::new());
    let source = Arc::new(ManualSource::new());
    let watcher = ProcessWatcher::new(
        executor.clone(),
        source.clone(),
        PREFIX,
        Handle::current(),
    );
    (executor, source, watcher)
}

fn exe(root: &Path, rel: &str) -> PathBuf {
    root.join(rel)
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_path_is_blocked_once() {
    let root = TempDir::new().unwrap();
    let (executor, source, watcher) = setup();
    let mut notifications = watcher.subscribe();

    watcher.start_monitoring(root.path()).unwrap();
    let path = exe(root.path(), "bin/client.exe");
    source.emit(ProcessEvent::new(100, "client.exe", Some(path.clone())));
    source.emit(ProcessEvent::new(101, "client.exe", Some(path.clone())));

    assert!(wait_for(|| executor.len() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(executor.len(), 1);

    let blocked = notifications.try_recv().unwrap();
    assert_eq!(blocked.pid, 100);
    assert_eq!(blocked.rule, "NetFence_Monitor_client_100");
    assert_eq!(blocked.path, path);
    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initial_sweep_blocks_running_processes() {
    let root = TempDir::new().unwrap();
    let (executor, source, watcher) = setup();
    source.set_running(vec![
        ProcessEvent::new(10, "server.exe", Some(exe(root.path(), "lic/server.exe"))),
        ProcessEvent::new(11, "bash", Some(PathBuf::from("/usr/bin/bash"))),
        ProcessEvent::new(12, "kworker", None),
    ]);

    watcher.start_monitoring(root.path()).unwrap();

    let rules = executor.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "NetFence_Monitor_server_10");
    assert_eq!(watcher.blocked_paths().len(), 1);
    assert!(watcher.is_monitoring());
    assert_eq!(watcher.monitored_root(), Some(root.path().to_path_buf()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_path_prefix_is_case_insensitive_and_component_aware() {
    let root = TempDir::new().unwrap();
    let (executor, _source, watcher) = setup();
    watcher.start_monitoring(root.path()).unwrap();

    let upper = PathBuf::from(root.path().to_string_lossy().to_uppercase()).join("a.exe");
    let sibling = PathBuf::from(format!("{}-other", root.path().display())).join("b.exe");

    assert!(watcher
        .handle_event(ProcessEvent::new(1, "a.exe", Some(upper)))
        .is_some());
    assert!(watcher
        .handle_event(ProcessEvent::new(2, "b.exe", Some(sibling)))
        .is_none());
    assert_eq!(executor.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_path_falls_back_to_lookup() {
    let root = TempDir::new().unwrap();
    let (executor, source, watcher) = setup();
    watcher.start_monitoring(root.path()).unwrap();

    // exited before its path could be read
    assert!(watcher
        .handle_event(ProcessEvent::new(5, "gone.exe", None))
        .is_none());

    source.set_path(6, exe(root.path(), "svc.exe"));
    let blocked = watcher
        .handle_event(ProcessEvent::new(6, "svc.exe", None))
        .unwrap();
    assert_eq!(blocked.rule, "NetFence_Monitor_svc_6");
    assert_eq!(executor.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_starts_a_fresh_session() {
    let root = TempDir::new().unwrap();
    let (executor, _source, watcher) = setup();
    let path = exe(root.path(), "tool.exe");

    watcher.start_monitoring(root.path()).unwrap();
    assert!(watcher
        .handle_event(ProcessEvent::new(1, "tool.exe", Some(path.clone())))
        .is_some());

    watcher.start_monitoring(root.path()).unwrap();
    assert!(watcher.blocked_paths().is_empty());
    assert!(watcher
        .handle_event(ProcessEvent::new(2, "tool.exe", Some(path)))
        .is_some());
    assert_eq!(executor.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_ignores_events_and_unsubscribes() {
    let root = TempDir::new().unwrap();
    let (executor, source, watcher) = setup();

    // stopping while idle is a no-op
    watcher.stop_monitoring();

    watcher.start_monitoring(root.path()).unwrap();
    assert_eq!(source.subscriber_count(), 1);

    watcher.stop_monitoring();
    assert!(!watcher.is_monitoring());
    assert_eq!(watcher.monitored_root(), None);
    assert!(wait_for(|| source.subscriber_count() == 0).await);

    let path = exe(root.path(), "late.exe");
    assert!(watcher
        .handle_event(ProcessEvent::new(9, "late.exe", Some(path)))
        .is_none());
    assert!(executor.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_root_is_rejected() {
    let (_executor, _source, watcher) = setup();
    let err = watcher
        .start_monitoring(Path::new("/netfence/does/not/exist"))
        .unwrap_err();
    assert!(matches!(err, FenceError::RootNotFound(_)));
    assert!(!watcher.is_monitoring());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_with_missing_root_ends_old_session() {
    let root = TempDir::new().unwrap();
    let (_executor, source, watcher) = setup();
    watcher.start_monitoring(root.path()).unwrap();

    let err = watcher
        .start_monitoring(Path::new("/netfence/does/not/exist"))
        .unwrap_err();
    assert!(matches!(err, FenceError::RootNotFound(_)));
    assert!(!watcher.is_monitoring());
    assert_eq!(watcher.monitored_root(), None);
    assert!(wait_for(|| source.subscriber_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_restarts_leave_no_session_behind() {
    let root = TempDir::new().unwrap();
    let (_executor, source, watcher) = setup();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let watcher = watcher.clone();
            let root = root.path();
            scope.spawn(move || {
                for _ in 0..50 {
                    watcher.start_monitoring(root).unwrap();
                    watcher.stop_monitoring();
                }
            });
        }
    });

    // at most one session survives the interleaving, and stop ends it
    watcher.stop_monitoring();
    assert!(!watcher.is_monitoring());
    assert!(wait_for(|| source.subscriber_count() == 0).await);
}

struct RejectingExecutor;

impl RuleExecutor for RejectingExecutor {
    fn add_block_rule(&self, _rule: &BlockRule) -> Result<()> {
        Err(FenceError::ElevationRequired {
            operation: "add rule".to_string(),
            output: "The requested operation requires elevation.".to_string(),
        })
    }

    fn delete_rule(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn rule_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    fn list_rules(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn backend_name(&self) -> &'static str {
        "rejecting"
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_rule_is_not_recorded() {
    let root = TempDir::new().unwrap();
    let source = Arc::new(ManualSource::new());
    let watcher = ProcessWatcher::new(
        Arc::new(RejectingExecutor),
        source.clone(),
        PREFIX,
        Handle::current(),
    );
    let mut notifications = watcher.subscribe();

    watcher.start_monitoring(root.path()).unwrap();
    let path = exe(root.path(), "tool.exe");
    assert!(watcher
        .handle_event(ProcessEvent::new(3, "tool.exe", Some(path)))
        .is_none());

    assert!(watcher.blocked_paths().is_empty());
    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
}

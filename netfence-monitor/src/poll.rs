//! Snapshot-diffing poll loop shared by the polling sources
//!
//! A process that starts and exits within one poll interval is never seen;
//! that is acceptable for blocking long-lived network clients.

use crate::source::{ProcessEvent, Subscription, EVENT_QUEUE};
use netfence_core::Result;
use std::collections::HashSet;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Something that can list live pids and describe one of them
pub(crate) trait Snapshot: Send + 'static {
    fn pids(&self) -> Result<HashSet<u32>>;

    fn describe(&self, pid: u32) -> ProcessEvent;

    /// Events for pids not in `known`, updating `known` to the current set
    fn poll_once(&self, known: &mut HashSet<u32>) -> Result<Vec<ProcessEvent>> {
        let current = self.pids()?;
        let mut started: Vec<u32> = current.difference(known).copied().collect();
        started.sort_unstable();
        *known = current;

        Ok(started.into_iter().map(|pid| self.describe(pid)).collect())
    }
}

/// Start polling `snapshot` on `runtime`; the poller stops when the subscription drops
pub(crate) fn subscribe<S: Snapshot>(
    snapshot: S,
    poll_interval: Duration,
    runtime: &Handle,
) -> Result<Subscription> {
    let known = snapshot.pids()?;
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    runtime.spawn(run(snapshot, poll_interval, known, event_tx, shutdown_rx));
    Ok(Subscription::with_shutdown(event_rx, shutdown_tx))
}

async fn run<S: Snapshot>(
    snapshot: S,
    poll_interval: Duration,
    mut known: HashSet<u32>,
    event_tx: mpsc::Sender<ProcessEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match snapshot.poll_once(&mut known) {
                    Ok(events) => {
                        for event in events {
                            trace!("Process started: {} ({})", event.name, event.pid);
                            if event_tx.send(event).await.is_err() {
                                debug!("Process event receiver dropped, stopping poller");
                                return;
                            }
                        }
                    }
                    Err(e) => debug!("Process poll failed: {}", e),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("Process poller received shutdown signal");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeSnapshot {
        pids: Arc<Mutex<HashSet<u32>>>,
    }

    impl Snapshot for FakeSnapshot {
        fn pids(&self) -> Result<HashSet<u32>> {
            Ok(self.pids.lock().unwrap().clone())
        }

        fn describe(&self, pid: u32) -> ProcessEvent {
            ProcessEvent::new(pid, format!("p{}", pid), None)
        }
    }

    #[test]
    fn test_poll_reports_only_new_pids() {
        let snapshot = FakeSnapshot::default();
        snapshot.pids.lock().unwrap().insert(1);
        let mut known = snapshot.pids().unwrap();
        assert!(snapshot.poll_once(&mut known).unwrap().is_empty());

        snapshot.pids.lock().unwrap().extend([9, 4]);
        let events = snapshot.poll_once(&mut known).unwrap();
        let pids: Vec<u32> = events.iter().map(|e| e.pid).collect();
        assert_eq!(pids, vec![4, 9]);

        // an exited pid that is reused later counts as new again
        snapshot.pids.lock().unwrap().remove(&4);
        assert!(snapshot.poll_once(&mut known).unwrap().is_empty());
        snapshot.pids.lock().unwrap().insert(4);
        assert_eq!(snapshot.poll_once(&mut known).unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropping_subscription_stops_poller() {
        let snapshot = FakeSnapshot::default();
        let mut sub = subscribe(snapshot.clone(), Duration::from_millis(10), &Handle::current())
            .unwrap();

        snapshot.pids.lock().unwrap().insert(31);
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "p31");

        drop(sub);
        // the poller held the only other clone of the pid set
        assert!(tokio::time::timeout(Duration::from_secs(2), async {
            while Arc::strong_count(&snapshot.pids) > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok());
    }
}

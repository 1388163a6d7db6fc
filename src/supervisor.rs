use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handle for one spawned scan worker: the cooperative stop signal and the
/// join handle of its task. Scan data never lives here; workers read and
/// write it through the registry.
struct WorkerHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

/// Tracks one worker per active scan and can block until a worker exits.
#[derive(Default)]
pub struct WorkerSupervisor {
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl WorkerSupervisor {
    pub fn new() -> Self {
        WorkerSupervisor::default()
    }

    /// Track a freshly spawned worker. Replacing a live handle would orphan
    /// the old worker, so that case is logged.
    pub fn register(&self, scan_id: &str, cancel: CancellationToken, join: JoinHandle<()>) {
        let mut workers = self.workers.lock();
        if workers.contains_key(scan_id) {
            warn!(scan_id, "replacing existing worker handle");
        }
        workers.insert(
            scan_id.to_string(),
            WorkerHandle {
                cancel,
                join: Some(join),
            },
        );
    }

    /// Fire the stop signal for a worker. Returns false when no worker is
    /// tracked for the scan.
    pub fn cancel(&self, scan_id: &str) -> bool {
        match self.workers.lock().get(scan_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until the worker for `scan_id` has fully exited, then drop its
    /// handle. A no-op when no worker is tracked.
    pub async fn join(&self, scan_id: &str) {
        let join = {
            let mut workers = self.workers.lock();
            workers.get_mut(scan_id).and_then(|w| w.join.take())
        };

        if let Some(join) = join {
            if let Err(e) = join.await {
                if e.is_panic() {
                    warn!(scan_id, "scan worker panicked");
                }
            }
        }

        self.workers.lock().remove(scan_id);
    }

    /// Whether the tracked worker has exited. `None` when no worker is (or
    /// ever was) tracked for the scan.
    pub fn is_finished(&self, scan_id: &str) -> Option<bool> {
        self.workers
            .lock()
            .get(scan_id)
            .map(|w| w.join.as_ref().map(|j| j.is_finished()).unwrap_or(true))
    }

    /// Drop the handle without joining (used after liveness reconciliation
    /// of a worker that is already gone).
    pub fn forget(&self, scan_id: &str) {
        self.workers.lock().remove(scan_id);
    }

    /// Scan ids with a tracked, still-running worker.
    pub fn active_ids(&self) -> Vec<String> {
        self.workers
            .lock()
            .iter()
            .filter(|(_, w)| w.join.as_ref().is_some_and(|j| !j.is_finished()))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

//! Owns the tasks executing scans so shutdown can wait for them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;
use crate::scan::ScanStatus;

pub struct Supervisor {
    tasks: Mutex<HashMap<String, JoinHandle<ScanStatus>>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<ScanStatus>>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Supervisor task table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Spawns the task executing `scan_id`. Refused once shutdown has begun.
    pub fn spawn<F>(&self, scan_id: &str, task: F) -> Result<(), ScanError>
    where
        F: Future<Output = ScanStatus> + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(ScanError::ShuttingDown);
        }
        let mut tasks = self.tasks();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.insert(scan_id.to_string(), tokio::spawn(task));
        debug!("Spawned task for scan {} ({} tracked)", scan_id, tasks.len());
        Ok(())
    }

    /// Number of tasks still executing.
    pub fn running(&self) -> usize {
        self.tasks()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Waits for one scan's task and returns its final status. `None` when
    /// the task is unknown or panicked.
    pub async fn wait(&self, scan_id: &str) -> Option<ScanStatus> {
        let handle = self.tasks().remove(scan_id)?;
        match handle.await {
            Ok(status) => Some(status),
            Err(e) => {
                error!("Task for scan {} did not complete: {}", scan_id, e);
                None
            }
        }
    }

    /// Cancels the shutdown token without waiting.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Supervisor shutting down, {} scan task(s) running", self.running());
            self.shutdown.cancel();
        }
    }

    /// Waits up to `grace` for every task, then aborts the rest. Returns
    /// the number of aborted tasks.
    pub async fn drain(&self, grace: Duration) -> usize {
        let handles: Vec<(String, JoinHandle<ScanStatus>)> = self.tasks().drain().collect();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for (scan_id, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(status)) => debug!("Scan {} ended as {}", scan_id, status),
                Ok(Err(e)) => error!("Task for scan {} did not complete: {}", scan_id, e),
                Err(_) => {
                    warn!("Scan {} did not stop within {:?}, aborting", scan_id, grace);
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        info!("All scan tasks have stopped");
        aborted
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

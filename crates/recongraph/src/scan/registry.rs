//! In-memory live state of executing scans.
//!
//! Entries live in a `moka` cache. A running scan never expires; once an
//! entry is marked terminal it is re-inserted so the cache arms a TTL and
//! evicts it later.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use moka::Expiry;
use serde::Serialize;
use tokio::sync::Notify;

use super::pause_gate::PauseGate;
use super::status::ScanStatus;

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Live scan {} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Live scan {} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}

// ─── SubprocessHandle ───────────────────────────────────────────────────────

/// A handle to the tool process currently running for a scan.
///
/// The runner owns the child; this handle only carries its pid and a kill
/// signal the runner selects on, so a kill lands even while the tool is
/// silent.
#[derive(Debug, Clone)]
pub struct SubprocessHandle {
    tool: String,
    pid: Option<u32>,
    kill: Arc<Notify>,
}

impl SubprocessHandle {
    pub fn new(tool: &str, pid: Option<u32>) -> Self {
        Self {
            tool: tool.to_string(),
            pid,
            kill: Arc::new(Notify::new()),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Requests termination. The permit is stored, so a kill issued before
    /// the runner starts waiting is not lost.
    pub fn kill(&self) {
        self.kill.notify_one();
    }

    /// Resolves once `kill` has been called.
    pub async fn killed(&self) {
        self.kill.notified().await;
    }
}

// ─── ScanStats ──────────────────────────────────────────────────────────────

/// Running counters for a live scan.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanStats {
    pub subdomains_found: u64,
    pub urls_discovered: u64,
    pub params_classified: u64,
    pub findings_count: u64,
    pub current_tool: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Tool name to completion marker.
    pub tool_timings: BTreeMap<String, String>,
}

impl ScanStats {
    fn new() -> Self {
        Self {
            subdomains_found: 0,
            urls_discovered: 0,
            params_classified: 0,
            findings_count: 0,
            current_tool: None,
            started_at: Utc::now(),
            tool_timings: BTreeMap::new(),
        }
    }
}

/// Snapshot of a live scan merged into job details.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LiveDetails {
    pub subdomains_found: u64,
    pub urls_discovered: u64,
    pub params_classified: u64,
    pub findings_count: u64,
    pub current_tool: Option<String>,
    pub elapsed_seconds: f64,
    pub log_line_count: usize,
    pub tool_timings: BTreeMap<String, String>,
    pub status: ScanStatus,
}

// ─── ActiveScan ─────────────────────────────────────────────────────────────

/// Live state of one scan. Shared between its execution path, control
/// requests and stream observers.
#[derive(Debug)]
pub struct ActiveScan {
    scan_id: String,
    project_id: String,
    log_lines: RwLock<Vec<String>>,
    status: RwLock<ScanStatus>,
    pause_gate: PauseGate,
    subprocess: Mutex<Option<SubprocessHandle>>,
    stats: RwLock<ScanStats>,
    started: Instant,
    finished: AtomicBool,
}

impl ActiveScan {
    pub fn new(scan_id: &str, project_id: &str, status: ScanStatus) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            project_id: project_id.to_string(),
            log_lines: RwLock::new(Vec::new()),
            status: RwLock::new(status),
            pause_gate: PauseGate::new(),
            subprocess: Mutex::new(None),
            stats: RwLock::new(ScanStats::new()),
            started: Instant::now(),
            finished: AtomicBool::new(false),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Appends one line to the log.
    pub fn log(&self, line: impl Into<String>) {
        write(&self.log_lines, "log").push(line.into());
    }

    pub fn log_len(&self) -> usize {
        read(&self.log_lines, "log").len()
    }

    /// Lines at or after `cursor`, in append order.
    pub fn lines_from(&self, cursor: usize) -> Vec<String> {
        let lines = read(&self.log_lines, "log");
        lines.get(cursor..).map(<[String]>::to_vec).unwrap_or_default()
    }

    pub fn status(&self) -> ScanStatus {
        *read(&self.status, "status")
    }

    /// Moves to `next` if the state machine permits it.
    ///
    /// Returns the status in effect afterwards as `Ok` when the move
    /// happened, or the unchanged current status as `Err`.
    pub fn transition(&self, next: ScanStatus) -> Result<ScanStatus, ScanStatus> {
        let mut status = write(&self.status, "status");
        if status.can_transition_to(next) {
            *status = next;
            Ok(next)
        } else {
            Err(*status)
        }
    }

    /// True once the execution path has returned and written its last log line.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn set_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// True once cancel or stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.status().is_user_terminated()
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.pause_gate
    }

    fn subprocess_slot(&self) -> std::sync::MutexGuard<'_, Option<SubprocessHandle>> {
        match self.subprocess.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Live scan subprocess lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn attach_subprocess(&self, handle: SubprocessHandle) {
        *self.subprocess_slot() = Some(handle);
    }

    pub fn detach_subprocess(&self) {
        self.subprocess_slot().take();
    }

    pub fn subprocess(&self) -> Option<SubprocessHandle> {
        self.subprocess_slot().clone()
    }

    /// Signals the attached subprocess, if any. Returns whether one was found.
    pub fn kill_subprocess(&self) -> bool {
        match self.subprocess_slot().as_ref() {
            Some(handle) => {
                log::debug!(
                    "Killing {} (pid {:?}) for scan {}",
                    handle.tool(),
                    handle.pid(),
                    self.scan_id
                );
                handle.kill();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> ScanStats {
        read(&self.stats, "stats").clone()
    }

    pub fn update_stats<F>(&self, f: F)
    where
        F: FnOnce(&mut ScanStats),
    {
        let mut stats = write(&self.stats, "stats");
        f(&mut *stats);
    }

    pub fn details(&self) -> LiveDetails {
        let stats = self.stats();
        LiveDetails {
            subdomains_found: stats.subdomains_found,
            urls_discovered: stats.urls_discovered,
            params_classified: stats.params_classified,
            findings_count: stats.findings_count,
            current_tool: stats.current_tool,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            log_line_count: self.log_len(),
            tool_timings: stats.tool_timings,
            status: self.status(),
        }
    }
}

// ─── ActiveScanRegistry ─────────────────────────────────────────────────────

struct TerminalExpiry {
    ttl: Duration,
}

impl TerminalExpiry {
    fn ttl_for(&self, scan: &ActiveScan) -> Option<Duration> {
        scan.status().is_terminal().then_some(self.ttl)
    }
}

impl Expiry<String, Arc<ActiveScan>> for TerminalExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<ActiveScan>,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.ttl_for(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<ActiveScan>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl_for(value)
    }
}

/// Process-wide table of live scans, keyed by scan id.
#[derive(Clone)]
pub struct ActiveScanRegistry {
    scans: Cache<String, Arc<ActiveScan>>,
}

impl ActiveScanRegistry {
    /// Creates a registry evicting finished scans `ttl` after they finish.
    pub fn new(ttl: Duration) -> Self {
        let scans = Cache::builder()
            .name("active-scans")
            .expire_after(TerminalExpiry { ttl })
            .build();
        Self { scans }
    }

    /// Registers live state for a scan about to execute.
    pub fn register(&self, scan_id: &str, project_id: &str) -> Arc<ActiveScan> {
        let scan = Arc::new(ActiveScan::new(scan_id, project_id, ScanStatus::Pending));
        self.scans.insert(scan_id.to_string(), scan.clone());
        log::debug!("Registered live state for scan {}", scan_id);
        scan
    }

    pub fn get(&self, scan_id: &str) -> Option<Arc<ActiveScan>> {
        self.scans.get(scan_id)
    }

    /// Arms the eviction TTL for a scan that reached a terminal state.
    pub fn mark_finished(&self, scan_id: &str) {
        if let Some(scan) = self.scans.get(scan_id) {
            scan.set_finished();
            self.scans.insert(scan_id.to_string(), scan);
        }
    }

    pub fn remove(&self, scan_id: &str) {
        self.scans.invalidate(scan_id);
    }

    /// All scans whose live status is not terminal.
    pub fn live(&self) -> Vec<Arc<ActiveScan>> {
        self.scans
            .iter()
            .map(|(_, scan)| scan)
            .filter(|scan| !scan.status().is_terminal())
            .collect()
    }

    pub fn len(&self) -> u64 {
        self.scans.run_pending_tasks();
        self.scans.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

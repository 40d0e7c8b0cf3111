//! Control surface of the scan engine.
//!
//! Every control request is validated against the persisted job status
//! before anything is mutated. Live state is updated first, then the
//! persisted record. A failed write after a live change is logged and the
//! live outcome returned.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::broadcast::{LogStream, ResultSummary, ScanJob, ScanStore};
use crate::config::{ReplayPolicy, ScanSettings, Settings};
use crate::db::{project_repo, Database};
use crate::error::{RecongraphError, ScanError, ToolError};
use crate::pipeline::{Pipeline, ScanContext, ScanType};
use crate::scan::{ActiveScanRegistry, ControlAction, LiveDetails, ScanStatus};
use crate::tools::{GoStatus, ToolChecker, ToolRunner, ToolStatus};
use crate::worker::Supervisor;

/// Page size of `list_scans` when none is given.
pub const DEFAULT_LIST_LIMIT: u64 = 50;

static RE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*$").unwrap()
});

/// Lowercases and checks a scan target. Only host names, single-label ones
/// included, and IPv4 addresses are accepted, so a target can never be read
/// as a flag.
pub fn normalize_target(raw: &str) -> Result<String, ScanError> {
    let target = raw.trim().trim_end_matches('.').to_lowercase();
    if target.len() > 253 || !RE_TARGET.is_match(&target) {
        return Err(ScanError::InvalidTarget(raw.to_string()));
    }
    Ok(target)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartScanRequest {
    /// Existing project to attach the scan to.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Name for a new project; defaults to the target.
    #[serde(default)]
    pub project_name: Option<String>,
    pub target_domain: String,
    pub scan_type: String,
}

/// Persisted job merged with the live snapshot, when the scan is live.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanDetails {
    #[serde(flatten)]
    pub job: ScanJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveDetails>,
}

pub struct Orchestrator {
    store: ScanStore,
    registry: ActiveScanRegistry,
    checker: Arc<ToolChecker>,
    pipeline: Arc<Pipeline>,
    supervisor: Supervisor,
    replay: ReplayPolicy,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl Orchestrator {
    /// Opens the configured database and builds the engine.
    pub fn from_settings(settings: &Settings) -> Result<Self, RecongraphError> {
        let db = Database::open(&settings.database_path)?;
        let checker = ToolChecker::from_settings(settings);
        Ok(Self::new(db, checker, &settings.scan)?)
    }

    /// Builds the engine over an open database. Jobs a previous process
    /// left active are marked failed.
    pub fn new(db: Database, checker: ToolChecker, settings: &ScanSettings) -> Result<Self, ScanError> {
        let store = ScanStore::new(db);
        store.fail_orphaned()?;

        let registry = ActiveScanRegistry::new(settings.live_state_ttl());
        let checker = Arc::new(checker);
        let runner = ToolRunner::new(
            checker.clone(),
            settings.stderr_line_limit,
            settings.stage_timeout(),
        );
        let pipeline = Arc::new(Pipeline::new(store.clone(), runner, registry.clone()));

        Ok(Self {
            store,
            registry,
            checker,
            pipeline,
            supervisor: Supervisor::new(),
            replay: settings.replay,
            poll_interval: settings.poll_interval(),
            shutdown_grace: settings.shutdown_grace(),
        })
    }

    pub fn database(&self) -> &Database {
        self.store.database()
    }

    pub fn registry(&self) -> &ActiveScanRegistry {
        &self.registry
    }

    // ─── Jobs ───────────────────────────────────────────────────────────────

    /// Creates a job and launches it in the background. Returns the job as
    /// created, still pending.
    pub fn start_scan(&self, request: StartScanRequest) -> Result<ScanJob, ScanError> {
        if self.supervisor.is_shutting_down() {
            return Err(ScanError::ShuttingDown);
        }
        let scan_type = ScanType::parse(&request.scan_type)
            .ok_or_else(|| ScanError::UnknownScanType(request.scan_type.clone()))?;
        let target = normalize_target(&request.target_domain)?;

        let project_id = match request.project_id.as_deref() {
            Some(id) => {
                project_repo::find_by_id(self.database(), id)?
                    .ok_or_else(|| ScanError::ProjectNotFound(id.to_string()))?
                    .id
            }
            None => {
                let name = request.project_name.as_deref().unwrap_or(&target);
                project_repo::create(self.database(), name, &target)?.id
            }
        };

        let job = self.store.create(&project_id, scan_type.as_str(), &target)?;
        let scan = self.registry.register(&job.id, &project_id);
        let ctx = ScanContext::new(scan, scan_type, &target);
        let pipeline = self.pipeline.clone();

        if let Err(e) = self
            .supervisor
            .spawn(&job.id, async move { pipeline.run(ctx).await })
        {
            self.store.finish(
                &job.id,
                ScanStatus::Failed,
                &ResultSummary::new(),
                Some(e.to_string().as_str()),
            )?;
            self.registry.remove(&job.id);
            return Err(e);
        }

        log::info!("Started {} scan {} on {}", scan_type, job.id, target);
        Ok(job)
    }

    /// Newest first, at most `limit` (default 50).
    pub fn list_scans(
        &self,
        project_id: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<ScanJob>, ScanError> {
        Ok(self
            .store
            .list(project_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))?)
    }

    pub fn get_scan(&self, scan_id: &str) -> Result<ScanJob, ScanError> {
        self.store
            .get(scan_id)?
            .ok_or_else(|| ScanError::NotFound(scan_id.to_string()))
    }

    pub fn scan_details(&self, scan_id: &str) -> Result<ScanDetails, ScanError> {
        let job = self.get_scan(scan_id)?;
        let live = self.registry.get(scan_id).map(|scan| scan.details());
        Ok(ScanDetails { job, live })
    }

    /// Waits for a launched scan to end. `None` if it is not tracked.
    pub async fn wait(&self, scan_id: &str) -> Option<ScanStatus> {
        self.supervisor.wait(scan_id).await
    }

    // ─── Control ────────────────────────────────────────────────────────────

    pub fn pause(&self, scan_id: &str) -> Result<ScanJob, ScanError> {
        self.control(scan_id, ControlAction::Pause)
    }

    pub fn resume(&self, scan_id: &str) -> Result<ScanJob, ScanError> {
        self.control(scan_id, ControlAction::Resume)
    }

    /// Ends the scan early. Results stored so far are kept.
    pub fn cancel(&self, scan_id: &str) -> Result<ScanJob, ScanError> {
        self.control(scan_id, ControlAction::Cancel)
    }

    /// Ends the scan early, keeping partial results.
    pub fn stop(&self, scan_id: &str) -> Result<ScanJob, ScanError> {
        self.control(scan_id, ControlAction::Stop)
    }

    fn control(&self, scan_id: &str, action: ControlAction) -> Result<ScanJob, ScanError> {
        let job = self.get_scan(scan_id)?;
        let rejected = |status: ScanStatus| ScanError::InvalidTransition {
            scan_id: scan_id.to_string(),
            action,
            status,
        };
        if !action.is_allowed_from(job.status) {
            return Err(rejected(job.status));
        }

        let mut step: Option<String> = None;
        let live = self.registry.get(scan_id);
        if let Some(scan) = &live {
            scan.transition(action.target_status()).map_err(rejected)?;
            match action {
                ControlAction::Pause => {
                    scan.pause_gate().pause();
                    step = Some("Paused".to_string());
                }
                ControlAction::Resume => {
                    scan.pause_gate().resume();
                    step = scan
                        .stats()
                        .current_tool
                        .map(|tool| format!("Running {}...", tool));
                }
                ControlAction::Cancel | ControlAction::Stop => {
                    scan.kill_subprocess();
                    // Release a paused execution path so it sees the stop.
                    scan.pause_gate().resume();
                }
            }
        }

        match self.store.apply_action(scan_id, action, step.as_deref()) {
            Ok(true) => {}
            Ok(false) => log::debug!(
                "Persisted status of {} changed before {} was stored",
                scan_id,
                action
            ),
            // The live scan already acted on the request and its final
            // status is written when it ends.
            Err(e) if live.is_some() => {
                log::error!("Failed to persist {} of scan {}: {}", action, scan_id, e);
                return Ok(ScanJob {
                    status: action.target_status(),
                    current_step: step.or(job.current_step),
                    ..job
                });
            }
            Err(e) => return Err(e.into()),
        }
        log::info!("Scan {}: {} requested", scan_id, action);
        self.get_scan(scan_id)
    }

    // ─── Streaming ──────────────────────────────────────────────────────────

    /// A new event feed for `scan_id`, replaying history per the configured
    /// policy.
    pub fn subscribe(&self, scan_id: &str) -> LogStream {
        LogStream::new(
            self.registry.clone(),
            scan_id,
            self.replay,
            self.poll_interval,
            self.supervisor.shutdown_token(),
        )
    }

    // ─── Tools ──────────────────────────────────────────────────────────────

    pub async fn tool_statuses(&self) -> Vec<ToolStatus> {
        self.checker.check_all().await
    }

    pub async fn go_status(&self) -> GoStatus {
        self.checker.go_status().await
    }

    pub async fn install_tool(&self, name: &str) -> Result<ToolStatus, ToolError> {
        self.checker.install(name).await
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Stops every live scan, keeping partial results, and waits for their
    /// tasks within the shutdown grace period. Returns how many tasks had to
    /// be aborted.
    pub async fn shutdown(&self) -> usize {
        self.supervisor.begin_shutdown();

        for scan in self.registry.live() {
            let scan_id = scan.scan_id().to_string();
            if scan.transition(ScanStatus::Stopped).is_err() {
                continue;
            }
            scan.kill_subprocess();
            scan.pause_gate().resume();
            match self.store.apply_action(&scan_id, ControlAction::Stop, None) {
                Ok(_) => log::info!("Stopped scan {} for shutdown", scan_id),
                Err(e) => log::error!("Failed to persist stop of {}: {}", scan_id, e),
            }
        }

        self.supervisor.drain(self.shutdown_grace).await
    }
}

//! Typed access to persisted scan jobs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::scan_repo::{self, ScanRow};
use crate::db::{Database, DatabaseError};
use crate::error::ScanError;
use crate::parsers::ParseResult;
use crate::scan::{ControlAction, ScanStatus};

/// Parse results keyed by tool name, accumulated as stages complete.
pub type ResultSummary = BTreeMap<String, ParseResult>;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_status(s: &str, scan_id: &str) -> ScanStatus {
    ScanStatus::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown scan status '{}' for scan {}, treating as failed",
            s,
            scan_id
        );
        ScanStatus::Failed
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_summary(s: Option<&str>, scan_id: &str) -> ResultSummary {
    match s {
        None => ResultSummary::new(),
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            log::warn!("Unreadable result summary for scan {}: {}", scan_id, e);
            ResultSummary::new()
        }),
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

// ─── ScanJob ────────────────────────────────────────────────────────────────

/// The persisted record of one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJob {
    pub id: String,
    pub project_id: String,
    pub scan_type: String,
    pub target: String,
    pub status: ScanStatus,
    pub current_step: Option<String>,
    pub progress: u8,
    pub result_summary: ResultSummary,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn from_row(row: &ScanRow) -> Self {
        Self {
            id: row.id.clone(),
            project_id: row.project_id.clone(),
            scan_type: row.scan_type.clone(),
            target: row.target.clone(),
            status: parse_status(&row.status, &row.id),
            current_step: row.current_step.clone(),
            progress: row.progress.clamp(0, 100) as u8,
            result_summary: parse_summary(row.result_summary.as_deref(), &row.id),
            error: row.error.clone(),
            started_at: row.started_at.as_deref().map(parse_timestamp),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

// ─── ScanStore ──────────────────────────────────────────────────────────────

/// Reads and writes scan jobs. Every write is a single statement.
#[derive(Clone)]
pub struct ScanStore {
    db: Database,
}

impl ScanStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a pending job unless the project already has an active one.
    pub fn create(
        &self,
        project_id: &str,
        scan_type: &str,
        target: &str,
    ) -> Result<ScanJob, ScanError> {
        let row = ScanRow {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            scan_type: scan_type.to_string(),
            target: target.to_string(),
            status: ScanStatus::Pending.as_str().to_string(),
            current_step: None,
            progress: 0,
            result_summary: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: now_timestamp(),
        };

        if !scan_repo::insert_if_no_active(&self.db, &row)? {
            return Err(ScanError::Conflict {
                project_id: project_id.to_string(),
            });
        }
        log::info!(
            "Created {} scan {} for project {}",
            scan_type,
            row.id,
            project_id
        );
        Ok(ScanJob::from_row(&row))
    }

    pub fn get(&self, scan_id: &str) -> Result<Option<ScanJob>, DatabaseError> {
        Ok(scan_repo::find_by_id(&self.db, scan_id)?.map(|row| ScanJob::from_row(&row)))
    }

    /// Newest first.
    pub fn list(&self, project_id: Option<&str>, limit: u64) -> Result<Vec<ScanJob>, DatabaseError> {
        Ok(scan_repo::list(&self.db, project_id, limit)?
            .iter()
            .map(ScanJob::from_row)
            .collect())
    }

    /// Moves a pending job to running. Returns false if it was no longer pending.
    pub fn mark_started(&self, scan_id: &str) -> Result<bool, DatabaseError> {
        scan_repo::mark_started(&self.db, scan_id, &now_timestamp())
    }

    pub fn set_progress(&self, scan_id: &str, progress: u8) -> Result<(), DatabaseError> {
        scan_repo::update_progress(&self.db, scan_id, i64::from(progress))
    }

    pub fn set_step(&self, scan_id: &str, step: &str) -> Result<(), DatabaseError> {
        scan_repo::update_step(&self.db, scan_id, step)
    }

    pub fn save_summary(&self, scan_id: &str, summary: &ResultSummary) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(summary)?;
        scan_repo::update_summary(&self.db, scan_id, &json)
    }

    /// Applies a control action's status change if the persisted status
    /// still permits it. Returns whether the row changed.
    pub fn apply_action(
        &self,
        scan_id: &str,
        action: ControlAction,
        step: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let allowed: Vec<&str> = action.allowed_from().iter().map(|s| s.as_str()).collect();
        scan_repo::update_status_guarded(
            &self.db,
            scan_id,
            action.target_status().as_str(),
            step,
            &allowed,
        )
    }

    /// Records a terminal status with the summary accumulated so far.
    pub fn finish(
        &self,
        scan_id: &str,
        status: ScanStatus,
        summary: &ResultSummary,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        debug_assert!(status.is_terminal());
        let json = serde_json::to_string(summary)?;
        if status == ScanStatus::Completed {
            scan_repo::update_progress(&self.db, scan_id, 100)?;
        }
        scan_repo::finish(
            &self.db,
            scan_id,
            status.as_str(),
            Some(&json),
            error,
            &now_timestamp(),
        )
    }

    /// Fails jobs a previous process left pending, running or paused.
    pub fn fail_orphaned(&self) -> Result<usize, DatabaseError> {
        let count = scan_repo::fail_orphaned(&self.db, "Interrupted by restart", &now_timestamp())?;
        if count > 0 {
            log::warn!("Marked {} interrupted scan(s) as failed", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;

    fn setup() -> (ScanStore, String) {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "test", "example.com").unwrap();
        (ScanStore::new(db), project.id)
    }

    #[test]
    fn test_create_rejects_second_active_job() {
        let (store, project_id) = setup();
        let first = store.create(&project_id, "full_auto", "example.com").unwrap();
        assert_eq!(first.status, ScanStatus::Pending);
        assert_eq!(first.progress, 0);
        assert!(first.result_summary.is_empty());

        let err = store
            .create(&project_id, "subfinder", "example.com")
            .unwrap_err();
        assert!(matches!(err, ScanError::Conflict { .. }));
        assert_eq!(store.list(Some(&project_id), 50).unwrap().len(), 1);

        store
            .finish(&first.id, ScanStatus::Completed, &ResultSummary::new(), None)
            .unwrap();
        store.create(&project_id, "subfinder", "example.com").unwrap();
    }

    #[test]
    fn test_apply_action_respects_current_status() {
        let (store, project_id) = setup();
        let job = store.create(&project_id, "subfinder", "example.com").unwrap();

        // Pending jobs cannot be paused.
        assert!(!store.apply_action(&job.id, ControlAction::Pause, Some("Paused")).unwrap());

        assert!(store.mark_started(&job.id).unwrap());
        assert!(store.apply_action(&job.id, ControlAction::Pause, Some("Paused")).unwrap());
        let paused = store.get(&job.id).unwrap().unwrap();
        assert_eq!(paused.status, ScanStatus::Paused);
        assert_eq!(paused.current_step.as_deref(), Some("Paused"));
        assert!(paused.started_at.is_some());

        assert!(!store.apply_action(&job.id, ControlAction::Pause, None).unwrap());
        assert!(store.apply_action(&job.id, ControlAction::Cancel, None).unwrap());
        assert!(!store.apply_action(&job.id, ControlAction::Resume, None).unwrap());
    }

    #[test]
    fn test_finish_keeps_summary_and_progress() {
        let (store, project_id) = setup();
        let job = store.create(&project_id, "full_auto", "example.com").unwrap();
        store.mark_started(&job.id).unwrap();
        store.set_progress(&job.id, 30).unwrap();
        store.set_progress(&job.id, 5).unwrap();

        let mut summary = ResultSummary::new();
        summary.insert(
            "subfinder".to_string(),
            ParseResult {
                parsed_count: 3,
                new_count: 2,
                duplicate_count: 1,
                param_count: 0,
            },
        );
        store.save_summary(&job.id, &summary).unwrap();
        store
            .finish(&job.id, ScanStatus::Stopped, &summary, None)
            .unwrap();

        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Stopped);
        assert_eq!(stored.progress, 30);
        assert_eq!(stored.result_summary, summary);
        assert!(stored.completed_at.is_some());
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_fail_orphaned() {
        let (store, project_id) = setup();
        let job = store.create(&project_id, "full_auto", "example.com").unwrap();
        assert_eq!(store.fail_orphaned().unwrap(), 1);
        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("Interrupted by restart"));
        // The failed job no longer blocks a new one.
        store.create(&project_id, "subfinder", "example.com").unwrap();
    }

    #[test]
    fn test_from_row_tolerates_bad_fields() {
        let row = ScanRow {
            id: "x".to_string(),
            project_id: "p".to_string(),
            scan_type: "nuclei".to_string(),
            target: "example.com".to_string(),
            status: "exploded".to_string(),
            current_step: None,
            progress: 250,
            result_summary: Some("not json".to_string()),
            error: None,
            started_at: None,
            completed_at: None,
            created_at: "2024-01-15T10:30:00+00:00".to_string(),
        };
        let job = ScanJob::from_row(&row);
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.progress, 100);
        assert!(job.result_summary.is_empty());
        assert_eq!(job.created_at.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }
}

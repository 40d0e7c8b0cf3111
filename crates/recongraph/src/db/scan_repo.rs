//! Scan job repository: CRUD operations for the `scan_jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Statuses that count against the one-active-scan-per-project rule.
pub const ACTIVE_STATUSES: &[&str] = &["pending", "running", "paused"];

/// A raw scan job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub id: String,
    pub project_id: String,
    pub scan_type: String,
    pub target: String,
    pub status: String,
    pub current_step: Option<String>,
    pub progress: i64,
    /// JSON object keyed by tool name.
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl ScanRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            scan_type: row.get("scan_type")?,
            target: row.get("target")?,
            status: row.get("status")?,
            current_step: row.get("current_step")?,
            progress: row.get("progress")?,
            result_summary: row.get("result_summary")?,
            error: row.get("error")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn active_placeholders(first: usize) -> String {
    (0..ACTIVE_STATUSES.len())
        .map(|i| format!("?{}", first + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inserts `scan` only if its project has no pending, running or paused job.
///
/// The existence check and the insert are a single statement, so two
/// concurrent submissions for one project cannot both succeed.
/// Returns `false` when the row was not inserted.
pub fn insert_if_no_active(db: &Database, scan: &ScanRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "INSERT INTO scan_jobs (id, project_id, scan_type, target, status, current_step,
             progress, result_summary, error, started_at, completed_at, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
             WHERE NOT EXISTS (
                 SELECT 1 FROM scan_jobs WHERE project_id = ?2 AND status IN ({})
             )",
            active_placeholders(13)
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![
            &scan.id,
            &scan.project_id,
            &scan.scan_type,
            &scan.target,
            &scan.status,
            &scan.current_step,
            &scan.progress,
            &scan.result_summary,
            &scan.error,
            &scan.started_at,
            &scan.completed_at,
            &scan.created_at,
        ];
        for status in ACTIVE_STATUSES {
            values.push(status);
        }
        let inserted = conn.execute(&sql, values.as_slice())?;
        Ok(inserted == 1)
    })
}

/// Finds a scan job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ScanRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM scan_jobs WHERE id = ?1",
                params![id],
                ScanRow::from_row,
            )
            .optional()?)
    })
}

/// Lists scan jobs newest first, optionally restricted to one project.
pub fn list(
    db: &Database,
    project_id: Option<&str>,
    limit: u64,
) -> Result<Vec<ScanRow>, DatabaseError> {
    db.with_conn(|conn| {
        let limit = limit as i64;
        let rows = match project_id {
            Some(project_id) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM scan_jobs WHERE project_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![project_id, limit], ScanRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM scan_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], ScanRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Sets the status and step only when the current status is one of
/// `allowed_from`. Returns whether a row changed.
pub fn update_status_guarded(
    db: &Database,
    id: &str,
    status: &str,
    step: Option<&str>,
    allowed_from: &[&str],
) -> Result<bool, DatabaseError> {
    if allowed_from.is_empty() {
        return Ok(false);
    }
    db.with_conn(|conn| {
        let placeholders = (0..allowed_from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE scan_jobs SET status = ?2, current_step = COALESCE(?3, current_step)
             WHERE id = ?1 AND status IN ({})",
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&id, &status, &step];
        for from in allowed_from {
            values.push(from);
        }
        Ok(conn.execute(&sql, values.as_slice())? == 1)
    })
}

/// Marks a pending job as running and stamps `started_at`.
pub fn mark_started(db: &Database, id: &str, started_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scan_jobs SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, started_at],
        )?;
        Ok(changed == 1)
    })
}

/// Raises progress; never lowers it.
pub fn update_progress(db: &Database, id: &str, progress: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE scan_jobs SET progress = MAX(progress, ?2) WHERE id = ?1",
            params![id, progress.clamp(0, 100)],
        )?;
        Ok(())
    })
}

/// Sets the human-readable current step.
pub fn update_step(db: &Database, id: &str, step: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE scan_jobs SET current_step = ?2 WHERE id = ?1",
            params![id, step],
        )?;
        Ok(())
    })
}

/// Stores the accumulated result summary without changing status.
pub fn update_summary(db: &Database, id: &str, summary: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE scan_jobs SET result_summary = ?2 WHERE id = ?1",
            params![id, summary],
        )?;
        Ok(())
    })
}

/// Writes the terminal status together with the summary and optional error.
pub fn finish(
    db: &Database,
    id: &str,
    status: &str,
    summary: Option<&str>,
    error: Option<&str>,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE scan_jobs SET status = ?2, result_summary = COALESCE(?3, result_summary),
             error = ?4, completed_at = ?5
             WHERE id = ?1",
            params![id, status, summary, error, completed_at],
        )?;
        Ok(())
    })
}

/// Fails every job left active by a previous process. Returns the count.
pub fn fail_orphaned(db: &Database, reason: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE scan_jobs SET status = 'failed', error = ?1, completed_at = ?2
             WHERE status IN ({})",
            active_placeholders(3)
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&reason, &now];
        for status in ACTIVE_STATUSES {
            values.push(status);
        }
        Ok(conn.execute(&sql, values.as_slice())?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "test", "example.com").unwrap();
        (db, project.id)
    }

    fn insert(db: &Database, scan: &ScanRow) -> Result<(), DatabaseError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scan_jobs (id, project_id, scan_type, target, status, current_step,
                 progress, result_summary, error, started_at, completed_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    scan.id,
                    scan.project_id,
                    scan.scan_type,
                    scan.target,
                    scan.status,
                    scan.current_step,
                    scan.progress,
                    scan.result_summary,
                    scan.error,
                    scan.started_at,
                    scan.completed_at,
                    scan.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn set_status(db: &Database, id: &str, status: &str) {
        db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE scan_jobs SET status = ?2 WHERE id = ?1",
                params![id, status],
            )?)
        })
        .unwrap();
    }

    fn make_row(id: &str, project_id: &str, status: &str, created_at: &str) -> ScanRow {
        ScanRow {
            id: id.to_string(),
            project_id: project_id.to_string(),
            scan_type: "full_auto".to_string(),
            target: "example.com".to_string(),
            status: status.to_string(),
            current_step: None,
            progress: 0,
            result_summary: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let (db, project_id) = setup();
        let row = make_row("s1", &project_id, "pending", "2026-01-01T00:00:00Z");
        insert(&db, &row).unwrap();

        let found = find_by_id(&db, "s1").unwrap().unwrap();
        assert_eq!(found, row);
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_no_active_rejects_second_active() {
        let (db, project_id) = setup();
        let first = make_row("s1", &project_id, "pending", "2026-01-01T00:00:00Z");
        let second = make_row("s2", &project_id, "pending", "2026-01-01T00:00:01Z");

        assert!(insert_if_no_active(&db, &first).unwrap());
        assert!(!insert_if_no_active(&db, &second).unwrap());
        assert!(find_by_id(&db, "s2").unwrap().is_none());

        set_status(&db, "s1", "paused");
        assert!(!insert_if_no_active(&db, &second).unwrap());

        set_status(&db, "s1", "completed");
        assert!(insert_if_no_active(&db, &second).unwrap());
    }

    #[test]
    fn test_insert_if_no_active_is_per_project() {
        let (db, project_a) = setup();
        let project_b = project_repo::create(&db, "other", "other.com").unwrap().id;

        assert!(insert_if_no_active(&db, &make_row("a", &project_a, "pending", "t1")).unwrap());
        assert!(insert_if_no_active(&db, &make_row("b", &project_b, "pending", "t2")).unwrap());
    }

    #[test]
    fn test_list_newest_first_with_filter() {
        let (db, project_id) = setup();
        let other = project_repo::create(&db, "other", "other.com").unwrap().id;
        insert(&db, &make_row("s1", &project_id, "completed", "2026-01-01T00:00:00Z")).unwrap();
        insert(&db, &make_row("s2", &project_id, "failed", "2026-01-02T00:00:00Z")).unwrap();
        insert(&db, &make_row("s3", &other, "completed", "2026-01-03T00:00:00Z")).unwrap();

        let all = list(&db, None, 50).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);

        let scoped = list(&db, Some(&project_id), 50).unwrap();
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[0].id, "s2");

        assert_eq!(list(&db, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_progress_never_decreases() {
        let (db, project_id) = setup();
        insert(&db, &make_row("s1", &project_id, "running", "t1")).unwrap();

        update_progress(&db, "s1", 55).unwrap();
        update_progress(&db, "s1", 30).unwrap();
        assert_eq!(find_by_id(&db, "s1").unwrap().unwrap().progress, 55);

        update_progress(&db, "s1", 250).unwrap();
        assert_eq!(find_by_id(&db, "s1").unwrap().unwrap().progress, 100);
    }

    #[test]
    fn test_update_status_guarded() {
        let (db, project_id) = setup();
        insert(&db, &make_row("s1", &project_id, "cancelled", "t1")).unwrap();

        let changed =
            update_status_guarded(&db, "s1", "paused", Some("Paused"), &["running"]).unwrap();
        assert!(!changed);
        assert_eq!(find_by_id(&db, "s1").unwrap().unwrap().status, "cancelled");

        set_status(&db, "s1", "running");
        let changed =
            update_status_guarded(&db, "s1", "paused", Some("Paused"), &["running"]).unwrap();
        assert!(changed);
        let row = find_by_id(&db, "s1").unwrap().unwrap();
        assert_eq!(row.status, "paused");
        assert_eq!(row.current_step.as_deref(), Some("Paused"));
    }

    #[test]
    fn test_mark_started_only_from_pending() {
        let (db, project_id) = setup();
        insert(&db, &make_row("s1", &project_id, "pending", "t1")).unwrap();
        assert!(mark_started(&db, "s1", "2026-01-01T00:00:00Z").unwrap());
        assert!(!mark_started(&db, "s1", "2026-01-01T00:00:01Z").unwrap());

        let row = find_by_id(&db, "s1").unwrap().unwrap();
        assert_eq!(row.status, "running");
        assert_eq!(row.started_at.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn test_finish_keeps_summary_when_none() {
        let (db, project_id) = setup();
        insert(&db, &make_row("s1", &project_id, "running", "t1")).unwrap();
        update_summary(&db, "s1", r#"{"subfinder":{}}"#).unwrap();

        finish(&db, "s1", "stopped", None, None, "2026-01-01T00:00:00Z").unwrap();
        let row = find_by_id(&db, "s1").unwrap().unwrap();
        assert_eq!(row.status, "stopped");
        assert_eq!(row.result_summary.as_deref(), Some(r#"{"subfinder":{}}"#));
        assert!(row.completed_at.is_some());
    }

    #[test]
    fn test_fail_orphaned() {
        let (db, project_id) = setup();
        insert(&db, &make_row("a", &project_id, "running", "t1")).unwrap();
        insert(&db, &make_row("b", &project_id, "completed", "t2")).unwrap();

        let count = fail_orphaned(&db, "Interrupted by restart", "t3").unwrap();
        assert_eq!(count, 1);
        let row = find_by_id(&db, "a").unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error.as_deref(), Some("Interrupted by restart"));
        assert_eq!(find_by_id(&db, "b").unwrap().unwrap().status, "completed");
    }
}

//! Versioned schema migrations.
//!
//! Each migration runs in its own transaction together with its row in
//! `schema_migrations`, so a failed step leaves no partial schema behind.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "projects",
        sql: include_str!("sql/001_create_projects.sql"),
    },
    Migration {
        version: 2,
        name: "recon_entities",
        sql: include_str!("sql/002_create_recon_entities.sql"),
    },
    Migration {
        version: 3,
        name: "scan_jobs",
        sql: include_str!("sql/003_create_scan_jobs.sql"),
    },
];

/// Highest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Schema version recorded in the database, `0` for a fresh one.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Applies every migration newer than the recorded version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );",
    )?;

    let current = current_version(conn)?;
    if current > latest_version() {
        log::warn!(
            "Database schema v{} is newer than this build (v{})",
            current,
            latest_version()
        );
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let fail = |e: rusqlite::Error| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )
        .map_err(fail)?;
        tx.commit()?;

        log::info!("Applied schema migration v{} ({})", migration.version, migration.name);
    }

    Ok(())
}

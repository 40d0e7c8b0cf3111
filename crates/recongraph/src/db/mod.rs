//! SQLite persistence for projects, recon entities and scan jobs.
//!
//! One connection is shared by the engine; SQLite serializes writes anyway
//! and every statement here is short.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction};

pub mod error;
pub mod migrations;
pub mod project_repo;
pub mod recon_repo;
pub mod scan_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to the engine database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, creating parent directories, and
    /// brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("SQLite journal mode: {}", mode);
        let db = Self::prepare(conn)?;
        log::info!("Using scan database {}", path.display());
        Ok(db)
    }

    /// Private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Database connection lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        f(&self.lock())
    }

    /// Runs `f` in a transaction that is committed only if `f` succeeds.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// `~/.recongraph/data/recongraph.db`, if a home directory is known.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".recongraph").join("data").join("recongraph.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(db: &Database, table: &str) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    const INSERT_PROJECT: &str = "INSERT INTO projects (id, name, root_domain, created_at)
         VALUES ('p1', 'acme', 'example.com', '2026-01-01T00:00:00Z')";

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("scans.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert!(count(&db, "schema_migrations") > 0);

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");
        Database::open(&path)
            .unwrap()
            .with_conn(|conn| Ok(conn.execute(INSERT_PROJECT, [])?))
            .unwrap();

        let db = Database::open(&path).unwrap();
        assert_eq!(count(&db, "projects"), 1);
    }

    #[test]
    fn test_failed_transaction_is_rolled_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.transaction(|tx| {
            tx.execute(INSERT_PROJECT, [])?;
            Err(rusqlite::Error::QueryReturnedNoRows.into())
        });
        assert!(result.is_err());
        assert_eq!(count(&db, "projects"), 0);

        db.transaction(|tx| Ok(tx.execute(INSERT_PROJECT, [])?)).unwrap();
        assert_eq!(count(&db, "projects"), 1);
    }

    #[test]
    fn test_clones_share_the_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        db.with_conn(|conn| Ok(conn.execute(INSERT_PROJECT, [])?))
            .unwrap();
        assert_eq!(count(&other, "projects"), 1);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT INTO scan_jobs (id, project_id, scan_type, target, status, progress, created_at)
                 VALUES ('s1', 'missing', 'subfinder', 'example.com', 'pending', 0, '2026-01-01')",
                [],
            )?)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with(".recongraph/data/recongraph.db"));
    }
}

//! Project repository. Projects own every discovered entity and scan job.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw project row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub root_domain: String,
    pub created_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            root_domain: row.get("root_domain")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new project row.
pub fn insert(db: &Database, project: &ProjectRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, root_domain, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.name,
                project.root_domain,
                project.created_at
            ],
        )?;
        Ok(())
    })
}

/// Creates and stores a project with a fresh id.
pub fn create(db: &Database, name: &str, root_domain: &str) -> Result<ProjectRow, DatabaseError> {
    let project = ProjectRow {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        root_domain: root_domain.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    insert(db, &project)?;
    Ok(project)
}

/// Finds a project by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM projects WHERE id = ?1",
                params![id],
                ProjectRow::from_row,
            )
            .optional()?)
    })
}

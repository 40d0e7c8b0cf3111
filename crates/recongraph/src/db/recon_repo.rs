//! Recon entity repository: subdomains, urls, parameters and findings.
//!
//! Write helpers take a `&Connection` so parsers can batch a whole tool
//! output into one transaction via [`Database::transaction`].

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A raw subdomain row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdomainRow {
    pub id: String,
    pub project_id: String,
    pub subdomain: String,
    pub ip_address: Option<String>,
    pub status_code: Option<i64>,
    pub title: Option<String>,
    pub technologies: Vec<String>,
    pub content_length: Option<i64>,
    pub source: String,
}

impl SubdomainRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let technologies: Option<String> = row.get("technologies")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            subdomain: row.get("subdomain")?,
            ip_address: row.get("ip_address")?,
            status_code: row.get("status_code")?,
            title: row.get("title")?,
            technologies: technologies
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            content_length: row.get("content_length")?,
            source: row.get("source")?,
        })
    }
}

/// HTTP probe attributes attached to a subdomain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpProbe {
    pub ip_address: Option<String>,
    pub status_code: Option<i64>,
    pub title: Option<String>,
    pub technologies: Vec<String>,
    pub content_length: Option<i64>,
}

/// A finding to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFinding<'a> {
    pub project_id: &'a str,
    pub subdomain_id: Option<&'a str>,
    pub template_id: &'a str,
    pub name: &'a str,
    pub severity: &'a str,
    pub matched_at: &'a str,
    pub description: Option<&'a str>,
}

/// Entity totals for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectCounts {
    pub subdomains: u64,
    pub urls: u64,
    pub parameters: u64,
    pub findings: u64,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Subdomains ─────────────────────────────────────────────────────────────

/// Finds a subdomain by host name within a project.
pub fn find_subdomain(
    conn: &Connection,
    project_id: &str,
    host: &str,
) -> Result<Option<SubdomainRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM subdomains WHERE project_id = ?1 AND subdomain = ?2",
            params![project_id, host],
            SubdomainRow::from_row,
        )
        .optional()?)
}

/// Inserts a subdomain and returns its id.
pub fn insert_subdomain(
    conn: &Connection,
    project_id: &str,
    host: &str,
    source: &str,
    probe: Option<&HttpProbe>,
) -> Result<String, DatabaseError> {
    let id = new_id();
    let default_probe = HttpProbe::default();
    let probe = probe.unwrap_or(&default_probe);
    let technologies = serde_json::to_string(&probe.technologies)?;
    conn.execute(
        "INSERT INTO subdomains (id, project_id, subdomain, ip_address, status_code, title,
         technologies, content_length, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            project_id,
            host,
            probe.ip_address,
            probe.status_code,
            probe.title,
            technologies,
            probe.content_length,
            source,
        ],
    )?;
    Ok(id)
}

/// Returns the id of the host's subdomain, creating it when absent.
pub fn ensure_subdomain(
    conn: &Connection,
    project_id: &str,
    host: &str,
    source: &str,
) -> Result<String, DatabaseError> {
    match find_subdomain(conn, project_id, host)? {
        Some(existing) => Ok(existing.id),
        None => insert_subdomain(conn, project_id, host, source, None),
    }
}

/// Overwrites the probe attributes of an existing subdomain.
pub fn enrich_subdomain(
    conn: &Connection,
    id: &str,
    probe: &HttpProbe,
    source: &str,
) -> Result<(), DatabaseError> {
    let technologies = serde_json::to_string(&probe.technologies)?;
    conn.execute(
        "UPDATE subdomains SET ip_address = ?2, status_code = ?3, title = ?4,
         technologies = ?5, content_length = ?6, source = ?7
         WHERE id = ?1",
        params![
            id,
            probe.ip_address,
            probe.status_code,
            probe.title,
            technologies,
            probe.content_length,
            source,
        ],
    )?;
    Ok(())
}

/// Lists all subdomain host names of a project in insertion order.
pub fn list_subdomains(db: &Database, project_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT subdomain FROM subdomains WHERE project_id = ?1 ORDER BY rowid")?;
        let hosts = stmt
            .query_map(params![project_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hosts)
    })
}

/// Fetches a full subdomain row by host name.
pub fn get_subdomain(
    db: &Database,
    project_id: &str,
    host: &str,
) -> Result<Option<SubdomainRow>, DatabaseError> {
    db.with_conn(|conn| find_subdomain(conn, project_id, host))
}

// ─── URLs and parameters ────────────────────────────────────────────────────

/// Returns true when the project already holds this exact URL.
pub fn url_exists(conn: &Connection, project_id: &str, full_url: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM urls WHERE project_id = ?1 AND full_url = ?2 LIMIT 1",
            params![project_id, full_url],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Inserts a URL and returns its id.
pub fn insert_url(
    conn: &Connection,
    project_id: &str,
    subdomain_id: Option<&str>,
    full_url: &str,
    path: &str,
    source: &str,
) -> Result<String, DatabaseError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO urls (id, project_id, subdomain_id, full_url, path, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, project_id, subdomain_id, full_url, path, source],
    )?;
    Ok(id)
}

/// Inserts a query parameter with its classified attack types.
pub fn insert_parameter(
    conn: &Connection,
    url_id: &str,
    project_id: &str,
    name: &str,
    sample_value: Option<&str>,
    attack_types: &[String],
) -> Result<String, DatabaseError> {
    let id = new_id();
    let attack_types = serde_json::to_string(attack_types)?;
    conn.execute(
        "INSERT INTO parameters (id, url_id, project_id, name, sample_value, attack_types)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, url_id, project_id, name, sample_value, attack_types],
    )?;
    Ok(id)
}

/// Returns `(name, attack_types)` for every parameter of a project.
pub fn list_parameters(
    db: &Database,
    project_id: &str,
) -> Result<Vec<(String, Vec<String>)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT name, attack_types FROM parameters WHERE project_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![project_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(name, types)| (name, serde_json::from_str(&types).unwrap_or_default()))
            .collect())
    })
}

// ─── Findings ───────────────────────────────────────────────────────────────

/// Returns true when the same template already matched the same location.
pub fn finding_exists(
    conn: &Connection,
    project_id: &str,
    template_id: &str,
    matched_at: &str,
) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM findings
             WHERE project_id = ?1 AND template_id = ?2 AND matched_at = ?3 LIMIT 1",
            params![project_id, template_id, matched_at],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Inserts a finding and returns its id.
pub fn insert_finding(conn: &Connection, finding: &NewFinding<'_>) -> Result<String, DatabaseError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO findings (id, project_id, subdomain_id, template_id, name, severity,
         matched_at, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            finding.project_id,
            finding.subdomain_id,
            finding.template_id,
            finding.name,
            finding.severity,
            finding.matched_at,
            finding.description,
        ],
    )?;
    Ok(id)
}

/// Returns `(template_id, severity, subdomain_id)` for every finding of a project.
pub fn list_findings(
    db: &Database,
    project_id: &str,
) -> Result<Vec<(String, String, Option<String>)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT template_id, severity, subdomain_id FROM findings
             WHERE project_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![project_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

// ─── Counts ─────────────────────────────────────────────────────────────────

/// Counts every entity kind for one project.
pub fn counts(db: &Database, project_id: &str) -> Result<ProjectCounts, DatabaseError> {
    db.with_conn(|conn| {
        let count = |table: &str| -> Result<u64, DatabaseError> {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE project_id = ?1", table);
            Ok(conn.query_row(&sql, params![project_id], |r| r.get(0))?)
        };
        Ok(ProjectCounts {
            subdomains: count("subdomains")?,
            urls: count("urls")?,
            parameters: count("parameters")?,
            findings: count("findings")?,
        })
    })
}

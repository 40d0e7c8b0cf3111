//! Isolated orchestrator with fake tool binaries.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use recongraph::db::project_repo;
use recongraph::{
    Database, Orchestrator, ScanEvent, ScanJob, ScanSettings, ScanStatus, StartScanRequest,
    ToolChecker,
};

pub const SUBFINDER: &str = "echo a.example.com\necho b.example.com";
pub const HTTPX: &str =
    r#"while read h; do echo "{\"host\":\"$h\",\"status_code\":200,\"title\":\"Home\"}"; done"#;
pub const WAYBACK: &str = "echo 'https://a.example.com/search?q=1&redirect=x'";
pub const NUCLEI: &str = r#"while read u; do echo "{\"template-id\":\"exposed-panel\",\"info\":{\"name\":\"Panel\",\"severity\":\"medium\"},\"matched-at\":\"$u\"}"; done"#;

/// Test harness providing an orchestrator over a throwaway environment.
pub struct TestHarness {
    temp_dir: TempDir,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    /// Harness with fast polling and no tools installed.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        Self::with_database(temp_dir, db)
    }

    /// Harness over an existing database, keeping `temp_dir` alive.
    pub fn with_database(temp_dir: TempDir, db: Database) -> Self {
        let go_path = temp_dir.path().join("go");
        let extra = temp_dir.path().join("extra");
        std::fs::create_dir_all(go_path.join("bin")).expect("Failed to create go bin dir");
        std::fs::create_dir_all(&extra).expect("Failed to create extra bin dir");

        let checker = ToolChecker::new(
            go_path,
            extra.as_os_str(),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        let settings = ScanSettings {
            stream_poll_interval_ms: 10,
            shutdown_grace_secs: 5,
            stage_timeout_secs: 30,
            ..ScanSettings::default()
        };
        let orchestrator =
            Orchestrator::new(db, checker, &settings).expect("Failed to build orchestrator");
        Self {
            temp_dir,
            orchestrator,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn go_bin(&self) -> PathBuf {
        self.temp_dir.path().join("go").join("bin")
    }

    /// Installs a fake tool whose body is a `sh` script.
    pub fn install_tool(&self, name: &str, body: &str) {
        let path = self.go_bin().join(name);
        let script = format!("#!/bin/sh\nPATH=\"$PATH:/usr/bin:/bin\"\n{}\n", body);
        std::fs::write(&path, script).expect("Failed to write tool script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to mark tool executable");
    }

    /// Installs the four chain tools with well-behaved output.
    pub fn install_chain(&self) {
        self.install_tool("subfinder", SUBFINDER);
        self.install_tool("httpx", HTTPX);
        self.install_tool("waybackurls", WAYBACK);
        self.install_tool("nuclei", NUCLEI);
    }

    /// Installs a subfinder that prints `count` hosts, one every `delay`.
    pub fn install_slow_subfinder(&self, count: u32, delay: &str) {
        self.install_tool(
            "subfinder",
            &format!(
                "i=1\nwhile [ $i -le {count} ]; do echo \"s$i.example.com\"; sleep {delay}; i=$((i+1)); done"
            ),
        );
    }

    pub fn create_project(&self, name: &str) -> String {
        project_repo::create(self.orchestrator.database(), name, "example.com")
            .expect("Failed to create project")
            .id
    }

    pub fn start(&self, project_id: &str, scan_type: &str) -> ScanJob {
        self.orchestrator
            .start_scan(StartScanRequest {
                project_id: Some(project_id.to_string()),
                project_name: None,
                target_domain: "example.com".to_string(),
                scan_type: scan_type.to_string(),
            })
            .expect("Failed to start scan")
    }

    /// Polls the persisted job until it reaches `status`.
    pub async fn wait_for_status(&self, scan_id: &str, status: ScanStatus) -> ScanJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.orchestrator.get_scan(scan_id).expect("Scan not found");
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "scan {} stuck in {} waiting for {}",
                scan_id,
                job.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls the persisted job until `tool` has a recorded result.
    pub async fn wait_for_result(&self, scan_id: &str, tool: &str) -> ScanJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.orchestrator.get_scan(scan_id).expect("Scan not found");
            if job.result_summary.contains_key(tool) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "scan {} has no {} result ({})",
                scan_id,
                tool,
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls the live log until it holds at least `count` lines.
    pub async fn wait_for_log_lines(&self, scan_id: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let len = self
                .orchestrator
                .registry()
                .get(scan_id)
                .map(|scan| scan.log_len())
                .unwrap_or(0);
            if len >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "scan {} logged only {} lines",
                scan_id,
                len
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits for the scan task and returns the persisted job.
    pub async fn finish(&self, scan_id: &str) -> ScanJob {
        tokio::time::timeout(Duration::from_secs(15), self.orchestrator.wait(scan_id))
            .await
            .expect("Scan did not finish in time");
        self.orchestrator.get_scan(scan_id).expect("Scan not found")
    }

    /// Collects a fresh feed of `scan_id` until it ends.
    pub async fn collect_events(&self, scan_id: &str) -> Vec<ScanEvent> {
        let mut stream = self.orchestrator.subscribe(scan_id);
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(15), async {
            while let Some(event) = stream.next_event().await {
                events.push(event);
            }
        })
        .await
        .expect("Feed did not end in time");
        events
    }

    pub fn log_lines(events: &[ScanEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Log { line } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}

//! Tool availability: binary resolution, version probing and installation.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::process::Command;

use super::catalog::{self, ToolInfo};
use crate::config::Settings;
use crate::error::ToolError;

const VERSION_MAX_CHARS: usize = 100;
const INSTALL_ERROR_MAX_CHARS: usize = 500;

/// Installation state of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

impl ToolStatus {
    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed: false,
            path: None,
            version: None,
        }
    }
}

/// Installation state of the Go toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoStatus {
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

/// Resolves tool binaries, preferring the Go bin directory over `PATH`.
#[derive(Debug, Clone)]
pub struct ToolChecker {
    go_path: PathBuf,
    search_path: OsString,
    version_timeout: Duration,
    install_timeout: Duration,
}

/// `$GOPATH`, falling back to `~/go`.
fn default_go_path() -> PathBuf {
    std::env::var_os("GOPATH")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join("go")))
        .unwrap_or_else(|| PathBuf::from("go"))
}

/// Prepends `dir` to `path` unless it is already listed.
fn prepend_to_path(dir: &Path, path: &OsStr) -> OsString {
    let mut entries: Vec<PathBuf> = std::env::split_paths(path).collect();
    if !entries.iter().any(|e| e == dir) {
        entries.insert(0, dir.to_path_buf());
    }
    std::env::join_paths(entries).unwrap_or_else(|e| {
        log::warn!("Cannot extend PATH with {}: {}", dir.display(), e);
        path.to_os_string()
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl ToolChecker {
    /// Builds a checker with an explicit Go path and search `PATH`.
    ///
    /// The Go bin directory is prepended to `search_path`.
    pub fn new(
        go_path: PathBuf,
        search_path: &OsStr,
        version_timeout: Duration,
        install_timeout: Duration,
    ) -> Self {
        let search_path = prepend_to_path(&go_path.join("bin"), search_path);
        Self {
            go_path,
            search_path,
            version_timeout,
            install_timeout,
        }
    }

    /// Builds a checker from settings and the process environment.
    pub fn from_settings(settings: &Settings) -> Self {
        let go_path = settings.go_path.clone().unwrap_or_else(default_go_path);
        let path = std::env::var_os("PATH").unwrap_or_default();
        Self::new(
            go_path,
            &path,
            Duration::from_secs(settings.tools.version_timeout_secs),
            Duration::from_secs(settings.tools.install_timeout_secs),
        )
    }

    pub fn go_bin_dir(&self) -> PathBuf {
        self.go_path.join("bin")
    }

    /// Finds an executable named `binary` on the search path.
    pub fn which(&self, binary: &str) -> Option<PathBuf> {
        std::env::split_paths(&self.search_path)
            .map(|dir| dir.join(binary))
            .find(|candidate| is_executable(candidate))
    }

    /// Locates the tool binary. The Go bin directory wins so that, e.g.,
    /// a Python `httpx` on `PATH` is not picked up.
    pub fn resolve(&self, tool: &ToolInfo) -> Option<PathBuf> {
        let go_bin = self.go_bin_dir().join(tool.binary);
        if is_executable(&go_bin) {
            return Some(go_bin);
        }
        self.which(tool.binary)
    }

    /// A command for `program` with the tool `PATH` applied.
    pub fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("PATH", &self.search_path)
            .env("GOPATH", &self.go_path)
            .kill_on_drop(true);
        cmd
    }

    /// Reports whether a tool is installed and which version.
    pub async fn check(&self, name: &str) -> ToolStatus {
        let Some(tool) = catalog::get(name) else {
            return ToolStatus::missing(name);
        };
        let Some(path) = self.resolve(tool) else {
            return ToolStatus::missing(name);
        };

        let version = match tool.version_flag {
            Some(flag) => Some(
                self.probe_version(&path, flag)
                    .await
                    .unwrap_or_else(|| "installed".to_string()),
            ),
            None => None,
        };

        ToolStatus {
            name: name.to_string(),
            installed: true,
            path: Some(path),
            version,
        }
    }

    /// Checks every catalog tool concurrently.
    pub async fn check_all(&self) -> Vec<ToolStatus> {
        join_all(catalog::names().map(|name| self.check(name))).await
    }

    /// First line of the combined version output, or `None` on failure.
    async fn probe_version(&self, path: &Path, flag: &str) -> Option<String> {
        let mut cmd = self.command(path);
        cmd.arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(self.version_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::debug!("Version probe of {} failed: {}", path.display(), e);
                return None;
            }
            Err(_) => {
                log::debug!("Version probe of {} timed out", path.display());
                return None;
            }
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let first = combined.trim().lines().next().unwrap_or_default();
        Some(truncate_chars(first, VERSION_MAX_CHARS))
    }

    /// Reports whether `go` is reachable and which version.
    pub async fn go_status(&self) -> GoStatus {
        let Some(path) = self.which("go") else {
            return GoStatus {
                installed: false,
                path: None,
                version: None,
            };
        };

        let mut cmd = self.command(&path);
        cmd.arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let version = match tokio::time::timeout(self.version_timeout, cmd.output()).await {
            Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
            _ => "unknown".to_string(),
        };

        GoStatus {
            installed: true,
            path: Some(path),
            version: Some(version),
        }
    }

    /// Installs a catalog tool with `go install -v`, bounded by the
    /// install timeout.
    pub async fn install(&self, name: &str) -> Result<ToolStatus, ToolError> {
        let tool = catalog::get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let go = self.go_status().await;
        let go_binary = match (go.installed, go.path) {
            (true, Some(path)) => path,
            _ => return Err(ToolError::GoMissing),
        };

        log::info!("Installing {} from {}", tool.name, tool.go_install_path);

        let mut cmd = self.command(&go_binary);
        cmd.args(["install", "-v", tool.go_install_path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(self.install_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::InstallFailed {
                    tool: tool.name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ToolError::InstallTimedOut {
                    tool: tool.name.to_string(),
                    secs: self.install_timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::InstallFailed {
                tool: tool.name.to_string(),
                reason: truncate_chars(stderr.trim(), INSTALL_ERROR_MAX_CHARS),
            });
        }

        log::info!("Installed {}", tool.name);
        Ok(self.check(tool.name).await)
    }
}

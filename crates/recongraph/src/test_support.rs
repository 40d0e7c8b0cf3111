//! Fake tool binaries for unit tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::tools::ToolChecker;

/// Writes an executable `sh` script. System dirs are appended to `PATH`
/// so scripts can use coreutils while tool lookup stays sandboxed.
pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let script = format!("#!/bin/sh\nPATH=\"$PATH:/usr/bin:/bin\"\n{}\n", body);
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A temporary GOPATH plus an extra bin dir standing in for `PATH`.
pub(crate) struct FakeToolbox {
    dir: TempDir,
}

impl FakeToolbox {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("go").join("bin")).unwrap();
        std::fs::create_dir_all(dir.path().join("extra")).unwrap();
        Self { dir }
    }

    pub(crate) fn go_path(&self) -> PathBuf {
        self.dir.path().join("go")
    }

    pub(crate) fn go_bin(&self) -> PathBuf {
        self.go_path().join("bin")
    }

    pub(crate) fn extra_bin(&self) -> PathBuf {
        self.dir.path().join("extra")
    }

    pub(crate) fn install_tool(&self, name: &str, body: &str) {
        write_script(&self.go_bin().join(name), body);
    }

    pub(crate) fn checker(&self) -> ToolChecker {
        ToolChecker::new(
            self.go_path(),
            self.extra_bin().as_os_str(),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
    }
}

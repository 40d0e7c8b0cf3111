//! Static registry of the recon tools the engine knows how to drive.

use serde::Serialize;

/// Description of one external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub binary: &'static str,
    /// Module path passed to `go install`.
    pub go_install_path: &'static str,
    /// Flag that prints the version, if the tool has one.
    pub version_flag: Option<&'static str>,
}

impl ToolInfo {
    /// Arguments for running this tool against `target`.
    ///
    /// httpx and nuclei read their targets from stdin.
    pub fn args(&self, target: &str) -> Vec<String> {
        match self.name {
            "subfinder" => vec!["-d".into(), target.into(), "-silent".into()],
            "httpx" => ["-silent", "-json", "-title", "-tech-detect", "-status-code"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            "waybackurls" => vec![target.into()],
            "gau" => vec![target.into(), "--threads".into(), "5".into()],
            "katana" => vec![
                "-u".into(),
                format!("https://{}", target),
                "-silent".into(),
                "-depth".into(),
                "2".into(),
            ],
            "nuclei" => ["-jsonl", "-silent", "-severity", "low,medium,high,critical"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Full command line, binary first. Used for log output.
    pub fn command_line(&self, target: &str) -> String {
        std::iter::once(self.binary.to_string())
            .chain(self.args(target))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub const TOOLS: &[ToolInfo] = &[
    ToolInfo {
        name: "subfinder",
        binary: "subfinder",
        go_install_path: "github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest",
        version_flag: Some("-version"),
    },
    ToolInfo {
        name: "httpx",
        binary: "httpx",
        go_install_path: "github.com/projectdiscovery/httpx/cmd/httpx@latest",
        version_flag: Some("-version"),
    },
    ToolInfo {
        name: "nuclei",
        binary: "nuclei",
        go_install_path: "github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest",
        version_flag: Some("-version"),
    },
    ToolInfo {
        name: "waybackurls",
        binary: "waybackurls",
        go_install_path: "github.com/tomnomnom/waybackurls@latest",
        version_flag: None,
    },
    ToolInfo {
        name: "gau",
        binary: "gau",
        go_install_path: "github.com/lc/gau/v2/cmd/gau@latest",
        version_flag: Some("-version"),
    },
    ToolInfo {
        name: "katana",
        binary: "katana",
        go_install_path: "github.com/projectdiscovery/katana/cmd/katana@latest",
        version_flag: Some("-version"),
    },
];

/// Looks up a tool by name.
pub fn get(name: &str) -> Option<&'static ToolInfo> {
    TOOLS.iter().find(|t| t.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    TOOLS.iter().map(|t| t.name)
}

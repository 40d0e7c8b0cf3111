use std::sync::Arc;

use crate::broadcast::scan_store::ResultSummary;
use crate::parsers::ParseResult;
use crate::scan::ActiveScan;
use crate::tools::{catalog, ToolInfo};

/// Scan type that runs the whole discovery chain.
pub const FULL_AUTO: &str = "full_auto";

/// Tools run by a `full_auto` scan, in order.
pub const FULL_AUTO_CHAIN: [&str; 4] = ["subfinder", "httpx", "waybackurls", "nuclei"];

/// What a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    FullAuto,
    Single(&'static ToolInfo),
}

impl ScanType {
    /// Accepts `full_auto` or the name of a catalog tool.
    pub fn parse(s: &str) -> Option<Self> {
        if s == FULL_AUTO {
            return Some(ScanType::FullAuto);
        }
        catalog::get(s).map(ScanType::Single)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::FullAuto => FULL_AUTO,
            ScanType::Single(tool) => tool.name,
        }
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ScanContext {
    // Input
    pub scan: Arc<ActiveScan>,
    pub scan_type: ScanType,
    pub target: String,

    // Per-tool parse results, filled as stages complete
    pub summary: ResultSummary,
}

impl ScanContext {
    pub fn new(scan: Arc<ActiveScan>, scan_type: ScanType, target: &str) -> Self {
        Self {
            scan,
            scan_type,
            target: target.to_string(),
            summary: ResultSummary::new(),
        }
    }

    pub fn scan_id(&self) -> &str {
        self.scan.scan_id()
    }

    pub fn project_id(&self) -> &str {
        self.scan.project_id()
    }

    pub fn record(&mut self, tool: &str, result: ParseResult) {
        self.summary.insert(tool.to_string(), result);
    }
}

//! Tool output parsers.
//!
//! Each parser turns the raw stdout of one tool into stored entities and
//! reports how many records it saw, created and skipped.

use serde::{Deserialize, Serialize};

use crate::db::{Database, DatabaseError};

pub mod classifier;
pub mod httpx;
pub mod nuclei;
pub mod subfinder;
pub mod waybackurls;

pub use classifier::{classify_parameter, AttackType};
pub use httpx::HttpxParser;
pub use nuclei::NucleiParser;
pub use subfinder::SubfinderParser;
pub use waybackurls::UrlListParser;

/// Counts reported by a parser for one tool output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub parsed_count: u64,
    pub new_count: u64,
    pub duplicate_count: u64,
    /// Query parameters stored, for URL parsers.
    #[serde(default)]
    pub param_count: u64,
}

/// Parses one tool's output into the database.
pub trait OutputParser: Send + Sync {
    /// Name recorded as the `source` of stored entities.
    fn source(&self) -> &str;

    fn parse(&self, db: &Database, project_id: &str, text: &str)
        -> Result<ParseResult, DatabaseError>;
}

/// Non-empty trimmed lines of a tool output.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Maps tool names to their parser.
pub struct ParserRegistry {
    subfinder: SubfinderParser,
    httpx: HttpxParser,
    waybackurls: UrlListParser,
    gau: UrlListParser,
    katana: UrlListParser,
    nuclei: NucleiParser,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            subfinder: SubfinderParser,
            httpx: HttpxParser,
            waybackurls: UrlListParser::new("waybackurls"),
            gau: UrlListParser::new("gau"),
            katana: UrlListParser::new("katana"),
            nuclei: NucleiParser,
        }
    }

    pub fn for_tool(&self, tool: &str) -> Option<&dyn OutputParser> {
        match tool {
            "subfinder" => Some(&self.subfinder),
            "httpx" => Some(&self.httpx),
            "waybackurls" => Some(&self.waybackurls),
            "gau" => Some(&self.gau),
            "katana" => Some(&self.katana),
            "nuclei" => Some(&self.nuclei),
            _ => None,
        }
    }

    /// Parses with the tool's parser; tools without one yield all zeros.
    pub fn parse(
        &self,
        tool: &str,
        db: &Database,
        project_id: &str,
        text: &str,
    ) -> Result<ParseResult, DatabaseError> {
        match self.for_tool(tool) {
            Some(parser) => parser.parse(db, project_id, text),
            None => {
                log::warn!("No parser registered for {}", tool);
                Ok(ParseResult::default())
            }
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

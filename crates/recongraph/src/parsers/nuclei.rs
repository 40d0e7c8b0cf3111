//! nuclei JSONL output.

use serde_json::Value;
use url::Url;

use super::{content_lines, OutputParser, ParseResult};
use crate::db::recon_repo::{self, NewFinding};
use crate::db::{Database, DatabaseError};

pub struct NucleiParser;

/// A nuclei result reduced to the fields we store.
#[derive(Debug, Clone, PartialEq)]
struct Finding {
    template_id: String,
    name: String,
    severity: String,
    matched_at: String,
    description: Option<String>,
}

fn first_str<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())
}

impl Finding {
    fn from_json(data: &Value) -> Self {
        let info = data.get("info");
        let info_field = |key: &str| info.and_then(|i| i.get(key));

        let template_id = first_str(&[data.get("template-id"), data.get("templateID")])
            .unwrap_or("unknown")
            .to_string();
        let name = first_str(&[info_field("name"), data.get("name")])
            .unwrap_or(&template_id)
            .to_string();
        let severity = first_str(&[info_field("severity"), data.get("severity")])
            .unwrap_or("info")
            .to_lowercase();
        let matched_at = first_str(&[data.get("matched-at"), data.get("matched"), data.get("host")])
            .unwrap_or_default()
            .to_string();
        let description = first_str(&[info_field("description")]).map(str::to_string);

        Self {
            template_id,
            name,
            severity,
            matched_at,
            description,
        }
    }

    fn host(&self) -> Option<String> {
        Url::parse(&self.matched_at)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }
}

impl OutputParser for NucleiParser {
    fn source(&self) -> &str {
        "nuclei"
    }

    fn parse(
        &self,
        db: &Database,
        project_id: &str,
        text: &str,
    ) -> Result<ParseResult, DatabaseError> {
        let mut result = ParseResult::default();

        db.transaction(|tx| {
            for line in content_lines(text) {
                let data: Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                result.parsed_count += 1;

                let finding = Finding::from_json(&data);
                let subdomain_id = match finding.host() {
                    Some(host) => recon_repo::find_subdomain(tx, project_id, &host)?.map(|s| s.id),
                    None => None,
                };

                if recon_repo::finding_exists(
                    tx,
                    project_id,
                    &finding.template_id,
                    &finding.matched_at,
                )? {
                    result.duplicate_count += 1;
                    continue;
                }

                recon_repo::insert_finding(
                    tx,
                    &NewFinding {
                        project_id,
                        subdomain_id: subdomain_id.as_deref(),
                        template_id: &finding.template_id,
                        name: &finding.name,
                        severity: &finding.severity,
                        matched_at: &finding.matched_at,
                        description: finding.description.as_deref(),
                    },
                )?;
                result.new_count += 1;
            }
            Ok(())
        })?;

        Ok(result)
    }
}

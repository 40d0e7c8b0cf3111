//! httpx JSONL output. Known hosts are enriched, unknown hosts inserted.

use serde_json::Value;

use super::{content_lines, OutputParser, ParseResult};
use crate::db::recon_repo::{self, HttpProbe};
use crate::db::{Database, DatabaseError};

pub struct HttpxParser;

fn str_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| data.get(*k))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(data: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().filter_map(|k| data.get(*k)).find_map(Value::as_i64)
}

fn technologies(data: &Value) -> Vec<String> {
    let value = data.get("tech").or_else(|| data.get("technologies"));
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn ip_address(data: &Value) -> Option<String> {
    str_field(data, &["host_ip"]).or_else(|| {
        data.get("a")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn probe_from(data: &Value) -> HttpProbe {
    HttpProbe {
        ip_address: ip_address(data),
        status_code: int_field(data, &["status_code", "status-code"]),
        title: str_field(data, &["title"]),
        technologies: technologies(data),
        content_length: int_field(data, &["content_length", "content-length"]),
    }
}

impl OutputParser for HttpxParser {
    fn source(&self) -> &str {
        "httpx"
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

                let Some(host) = str_field(&data, &["host", "input"]) else {
                    continue;
                };
                let host = host.trim().to_lowercase();
                let probe = probe_from(&data);

                match recon_repo::find_subdomain(tx, project_id, &host)? {
                    Some(existing) => {
                        recon_repo::enrich_subdomain(tx, &existing.id, &probe, self.source())?;
                        result.duplicate_count += 1;
                    }
                    None => {
                        recon_repo::insert_subdomain(
                            tx,
                            project_id,
                            &host,
                            self.source(),
                            Some(&probe),
                        )?;
                        result.new_count += 1;
                    }
                }
            }
            Ok(())
        })?;

        Ok(result)
    }
}

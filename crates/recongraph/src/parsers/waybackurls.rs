//! URL-list output (waybackurls, gau, katana): one URL per line.
//!
//! Each new URL is stored with its host's subdomain, and its query
//! parameters are classified and stored alongside.

use url::Url;

use super::{classify_parameter, content_lines, OutputParser, ParseResult};
use crate::db::{recon_repo, Database, DatabaseError};

pub struct UrlListParser {
    source: &'static str,
}

impl UrlListParser {
    pub fn new(source: &'static str) -> Self {
        Self { source }
    }
}

/// Parses `line` as a URL, assuming `https://` when no scheme is given.
fn normalize(line: &str) -> Option<Url> {
    let candidate = if line.starts_with("http://") || line.starts_with("https://") {
        line.to_string()
    } else {
        format!("https://{}", line)
    };
    Url::parse(&candidate).ok()
}

/// First value of each distinct query parameter, in order of appearance.
fn query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();
    for (name, value) in url.query_pairs() {
        if !params.iter().any(|(n, _)| *n == *name) {
            params.push((name.into_owned(), value.into_owned()));
        }
    }
    params
}

impl OutputParser for UrlListParser {
    fn source(&self) -> &str {
        self.source
    }

    fn parse(
        &self,
        db: &Database,
        project_id: &str,
        text: &str,
    ) -> Result<ParseResult, DatabaseError> {
        let lines: Vec<&str> = content_lines(text).collect();
        let mut result = ParseResult {
            parsed_count: lines.len() as u64,
            ..Default::default()
        };

        db.transaction(|tx| {
            for line in &lines {
                let Some(url) = normalize(line) else {
                    continue;
                };
                let Some(host) = url.host_str().map(str::to_lowercase) else {
                    continue;
                };

                let subdomain_id = recon_repo::ensure_subdomain(tx, project_id, &host, self.source)?;

                let full_url = url.as_str();
                if recon_repo::url_exists(tx, project_id, full_url)? {
                    result.duplicate_count += 1;
                    continue;
                }

                let url_id = recon_repo::insert_url(
                    tx,
                    project_id,
                    Some(&subdomain_id),
                    full_url,
                    url.path(),
                    self.source,
                )?;

                for (name, value) in query_params(&url) {
                    let attack_types: Vec<String> = classify_parameter(&name)
                        .iter()
                        .map(|a| a.to_string())
                        .collect();
                    recon_repo::insert_parameter(
                        tx,
                        &url_id,
                        project_id,
                        &name,
                        Some(&value),
                        &attack_types,
                    )?;
                    result.param_count += 1;
                }

                result.new_count += 1;
            }
            Ok(())
        })?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;

    #[test]
    fn test_normalize_adds_scheme() {
        assert_eq!(
            normalize("a.example.com/login").unwrap().as_str(),
            "https://a.example.com/login"
        );
        assert_eq!(
            normalize("http://a.example.com/").unwrap().scheme(),
            "http"
        );
    }

    #[test]
    fn test_query_params_keep_first_value() {
        let url = Url::parse("https://a.example.com/?id=1&q=&id=2&flag").unwrap();
        assert_eq!(
            query_params(&url),
            vec![
                ("id".to_string(), "1".to_string()),
                ("q".to_string(), String::new()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_stores_urls_params_and_subdomains() {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "p", "example.com").unwrap();
        let text = "https://a.example.com/item?id=7&utm_source=x\n\
                    a.example.com/search?q=test\n\
                    https://a.example.com/item?id=7&utm_source=x\n\
                    https://b.example.com/\n";

        let result = UrlListParser::new("waybackurls")
            .parse(&db, &project.id, text)
            .unwrap();
        assert_eq!(result.parsed_count, 4);
        assert_eq!(result.new_count, 3);
        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.param_count, 3);

        let hosts = recon_repo::list_subdomains(&db, &project.id).unwrap();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);

        let params = recon_repo::list_parameters(&db, &project.id).unwrap();
        assert_eq!(params[0], ("id".to_string(), vec!["SQLi".to_string(), "IDOR".to_string()]));
        assert_eq!(params[1], ("utm_source".to_string(), vec![]));
        assert_eq!(params[2], ("q".to_string(), vec!["XSS".to_string()]));

        let counts = recon_repo::counts(&db, &project.id).unwrap();
        assert_eq!(counts.urls, 3);
        assert_eq!(counts.parameters, 3);
    }
}

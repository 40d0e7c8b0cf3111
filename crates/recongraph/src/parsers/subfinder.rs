//! subfinder output: one host name per line.

use super::{content_lines, OutputParser, ParseResult};
use crate::db::{recon_repo, Database, DatabaseError};

pub struct SubfinderParser;

impl OutputParser for SubfinderParser {
    fn source(&self) -> &str {
        "subfinder"
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
                let host = line.to_lowercase();
                if host.contains(' ') || !host.contains('.') {
                    continue;
                }
                if recon_repo::find_subdomain(tx, project_id, &host)?.is_some() {
                    result.duplicate_count += 1;
                    continue;
                }
                recon_repo::insert_subdomain(tx, project_id, &host, self.source(), None)?;
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
    fn test_parse_dedups_and_skips_invalid() {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "p", "example.com").unwrap();
        let text = "A.example.com\n\nb.example.com\nnot a host\nlocalhost\na.example.com\n";

        let result = SubfinderParser.parse(&db, &project.id, text).unwrap();
        assert_eq!(result.parsed_count, 5);
        assert_eq!(result.new_count, 2);
        assert_eq!(result.duplicate_count, 1);

        let hosts = recon_repo::list_subdomains(&db, &project.id).unwrap();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn test_second_run_is_all_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "p", "example.com").unwrap();
        SubfinderParser.parse(&db, &project.id, "a.example.com").unwrap();

        let again = SubfinderParser.parse(&db, &project.id, "a.example.com").unwrap();
        assert_eq!(again.new_count, 0);
        assert_eq!(again.duplicate_count, 1);
    }
}

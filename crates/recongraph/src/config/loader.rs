use std::path::Path;

use crate::config::schema::{ReplayPolicy, Settings};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

/// Document syntax of a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Json,
    Yaml,
}

impl SettingsFormat {
    /// `.yaml`/`.yml` files are YAML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                SettingsFormat::Yaml
            }
            _ => SettingsFormat::Json,
        }
    }
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content, SettingsFormat::from_path(path))
}

/// Loads settings from `path` when given, otherwise returns the defaults.
pub fn load_settings_or_default(path: Option<&Path>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => load_settings(path),
        None => Ok(Settings::default()),
    }
}

pub fn load_settings_from_str(
    content: &str,
    format: SettingsFormat,
) -> Result<Settings, ConfigError> {
    let value: serde_json::Value = match format {
        SettingsFormat::Json => serde_json::from_str(content)?,
        SettingsFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_schema(&value)?;

    let settings: Settings = serde_json::from_value(value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    tracing_subscriber::EnvFilter::try_new(&settings.logging.level).map_err(|e| {
        ConfigError::Validation {
            message: format!("Invalid log level '{}': {}", settings.logging.level, e),
        }
    })?;

    if settings.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database_path must not be empty".to_string(),
        });
    }

    if settings.scan.stream_poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "scan.stream_poll_interval_ms must be greater than 0".to_string(),
        });
    }

    if settings.scan.replay == ReplayPolicy::Tail(0) {
        return Err(ConfigError::Validation {
            message: "scan.replay tail window must be greater than 0".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::path::PathBuf;

    #[test]
    fn test_load_json_settings() {
        let json = r#"
        {
            "database_path": "/tmp/recon.db",
            "go_path": "/opt/go",
            "scan": {
                "stream_poll_interval_ms": 250,
                "stage_timeout_secs": 0,
                "replay": { "tail": 100 }
            },
            "logging": { "level": "debug", "format": "json" }
        }
        "#;

        let settings = load_settings_from_str(json, SettingsFormat::Json).unwrap();
        assert_eq!(settings.database_path, PathBuf::from("/tmp/recon.db"));
        assert_eq!(settings.go_path, Some(PathBuf::from("/opt/go")));
        assert_eq!(settings.scan.stream_poll_interval_ms, 250);
        assert_eq!(settings.scan.stage_timeout(), None);
        assert_eq!(settings.scan.replay, ReplayPolicy::Tail(100));
        assert_eq!(settings.scan.stderr_line_limit, 20);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_yaml_settings() {
        let yaml = "
database_path: /var/lib/recon.db
scan:
  replay: full
  shutdown_grace_secs: 3
tools:
  install_timeout_secs: 60
";
        let settings = load_settings_from_str(yaml, SettingsFormat::Yaml).unwrap();
        assert_eq!(settings.scan.replay, ReplayPolicy::Full);
        assert_eq!(settings.scan.shutdown_grace_secs, 3);
        assert_eq!(settings.tools.install_timeout_secs, 60);
        assert_eq!(settings.tools.version_timeout_secs, 10);
    }

    #[test]
    fn test_schema_rejects_unknown_keys() {
        let result = load_settings_from_str(r#"{"workers": 4}"#, SettingsFormat::Json);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_bad_types() {
        let json = r#"{"scan": {"stream_poll_interval_ms": 0}}"#;
        let result = load_settings_from_str(json, SettingsFormat::Json);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let json = r#"{"logging": {"format": "xml"}}"#;
        let result = load_settings_from_str(json, SettingsFormat::Json);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let json = r#"{"logging": {"level": "recongraph=loud"}}"#;
        let result = load_settings_from_str(json, SettingsFormat::Json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(SettingsFormat::from_path(Path::new("a.yml")), SettingsFormat::Yaml);
        assert_eq!(SettingsFormat::from_path(Path::new("a.YAML")), SettingsFormat::Yaml);
        assert_eq!(SettingsFormat::from_path(Path::new("a.json")), SettingsFormat::Json);
        assert_eq!(SettingsFormat::from_path(Path::new("settings")), SettingsFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "scan:\n  stderr_line_limit: 5\n").unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.scan.stderr_line_limit, 5);

        let missing = load_settings(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_default_when_no_path() {
        let settings = load_settings_or_default(None).unwrap();
        assert_eq!(settings, Settings::default());
    }
}

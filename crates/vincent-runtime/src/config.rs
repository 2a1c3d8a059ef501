use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where remote policy evaluations are sent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SandboxConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

impl EngineConfig {
    /// Load config from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).context("Failed to parse TOML config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_file() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.sandbox.request_timeout_secs, 30);
        assert_eq!(config.sandbox.connect_timeout_secs, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sandbox]
endpoint = "https://sandbox.example"

[logging]
format = "pretty"
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sandbox.endpoint, "https://sandbox.example");
        assert_eq!(config.sandbox.request_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(Some(&dir.path().join("vincent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_bad_format_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"xml\"").unwrap();
        assert!(EngineConfig::load(Some(file.path())).is_err());
    }
}

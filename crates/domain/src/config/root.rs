use serde::{Deserialize, Serialize};
use std::path::Path;

use super::errors::ConfigError;
use super::hostdb::HostDbConfig;
use super::logging::LoggingConfig;

/// Top-level configuration file layout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub hostdb: HostDbConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or use defaults
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. hostdb.toml in current directory
    /// 3. /etc/hostdb/config.toml
    /// 4. Default configuration
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config = if let Some(path) = path {
            Self::from_file(path)?
        } else if Path::new("hostdb.toml").exists() {
            Self::from_file("hostdb.toml")?
        } else if Path::new("/etc/hostdb/config.toml").exists() {
            Self::from_file("/etc/hostdb/config.toml")?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hostdb.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[hostdb]\npartitions = 4\nmax_count = 400\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.hostdb.partitions, 4);
        assert_eq!(config.hostdb.max_count, 400);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = Config::load(Some("/nonexistent/hostdb.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::from_toml("[hostdb\npartitions = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.hostdb, HostDbConfig::default());
        assert_eq!(config.logging.level, "info");
    }
}

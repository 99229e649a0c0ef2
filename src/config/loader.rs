//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    AccessList {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::AccessList { path, source } => {
                write!(f, "cannot read access list {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) | ConfigError::AccessList { source: e, .. } => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Parse a TOML file without semantic checks.
///
/// Used as the base layer when CLI flags are overlaid before validation.
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = parse_config(path)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"127.0.0.1\"\nport = 7000\n[misc]\nno_shutdown = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.address(), "127.0.0.1:7000");
        assert!(config.misc.no_shutdown);
    }

    #[test]
    fn reports_parse_and_validation_errors() {
        let mut bad_syntax = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad_syntax, "port = \"not a number\"").unwrap();
        assert!(matches!(
            load_config(bad_syntax.path()),
            Err(ConfigError::Parse(_))
        ));

        let mut bad_semantics = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad_semantics, "port = 80\n[misc]\nsend_only = true\nreceive_only = true").unwrap();
        let err = load_config(bad_semantics.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/netrelay.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}

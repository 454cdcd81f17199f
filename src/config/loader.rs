//! Locating and parsing the transport config file.

use std::path::{Path, PathBuf};

use super::TransportConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LOM_TRANSPORT_CONFIG";

/// Finds the config file and parses it.
#[derive(Debug)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    /// Set when the caller named the file; a missing file is then an error.
    required: bool,
}

impl ConfigLoader {
    /// Loader over `$LOM_TRANSPORT_CONFIG` if set, otherwise
    /// `./lom-transport.toml` then `<config dir>/lom-transport/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Self::with_path(PathBuf::from(path));
        }

        let mut search_paths = vec![PathBuf::from("lom-transport.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("lom-transport").join("config.toml"));
        }
        Self {
            search_paths,
            required: false,
        }
    }

    /// Loader for exactly `path`, which must exist.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
            required: true,
        }
    }

    /// Parses the first existing file. Without one, searched loaders fall
    /// back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing explicit path, and a
    /// read or parse error naming the file otherwise.
    pub fn load(&self) -> Result<TransportConfig, ConfigError> {
        let Some(path) = self.search_paths.iter().find(|p| p.exists()) else {
            if self.required {
                return Err(ConfigError::NotFound {
                    path: self.search_paths.first().cloned().unwrap_or_default(),
                });
            }
            tracing::debug!("No config file found, using defaults");
            return Ok(TransportConfig::default());
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        Self::parse_file(path)
    }

    fn parse_file(path: &Path) -> Result<TransportConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Returns the candidate files in search order.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly named file is missing.
    #[error("Config file {path} does not exist")]
    NotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid TOML for this config.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_search_paths_start_in_working_directory() {
        if std::env::var_os(CONFIG_ENV).is_some() {
            return;
        }
        let loader = ConfigLoader::new();
        assert!(loader.search_paths()[0].ends_with("lom-transport.toml"));
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let err = ConfigLoader::with_path(PathBuf::from("/nonexistent/lom.toml"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/lom.toml"));
    }

    #[test]
    fn test_searched_paths_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader {
            search_paths: vec![dir.path().join("absent.toml")],
            required: false,
        };
        assert_eq!(loader.load().unwrap(), TransportConfig::default());
    }

    #[test]
    fn test_first_existing_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second.toml");
        std::fs::write(&second, "[client]\ntimeout_secs = 4\n").unwrap();

        let loader = ConfigLoader {
            search_paths: vec![dir.path().join("first.toml"), second],
            required: false,
        };
        assert_eq!(loader.load().unwrap().client.timeout_secs, 4);
    }

    #[test]
    fn test_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            address = "127.0.0.1:4000"

            [engine]
            read_timeout_ms = 250
            "#
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path().to_path_buf())
            .load()
            .unwrap();
        assert_eq!(config.server.address, "127.0.0.1:4000");
        assert_eq!(config.engine.read_timeout_ms, 250);
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\naddress = ").unwrap();

        let err = ConfigLoader::with_path(file.path().to_path_buf())
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err
            .to_string()
            .contains(&file.path().display().to_string()));
    }
}

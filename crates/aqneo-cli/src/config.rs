//! `aqneo.toml` loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use aqneo_graph::{GraphConfig, WriteOptions};

pub const DEFAULT_CONFIG_FILE: &str = "aqneo.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub neo4j: GraphConfig,
    pub writer: WriterConfig,
    pub traversal: TraversalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub workers: usize,
    pub chunksize: usize,
    pub connect_timeout_secs: u64,
    /// Abort on the first sink error.
    pub strict: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chunksize: 1,
            connect_timeout_secs: 10,
            strict: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub strict_cache: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self { strict_cache: true }
    }
}

/// Connection settings given on the command line or through the
/// `NEO4J_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl AppConfig {
    /// Load `path`, or `aqneo.toml` in the working directory when present.
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match path {
            Some(path) if !path.exists() => bail!("Config file not found: {}", path.display()),
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConnectionOverrides) {
        if let Some(uri) = overrides.uri {
            self.neo4j.uri = uri;
        }
        if let Some(user) = overrides.user {
            self.neo4j.user = user;
        }
        if let Some(password) = overrides.password {
            self.neo4j.password = password;
        }
        if let Some(database) = overrides.database {
            self.neo4j.database = database;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.writer.connect_timeout_secs)
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            workers: self.writer.workers.max(1),
            chunksize: self.writer.chunksize.max(1),
            connect_timeout: self.connect_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[neo4j]
uri = "bolt://graph.lab:7687"
password = "secret"

[writer]
workers = 8
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.neo4j.uri, "bolt://graph.lab:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.neo4j.password, "secret");
        assert_eq!(config.writer.workers, 8);
        assert_eq!(config.writer.chunksize, 1);
        assert!(config.writer.strict);
        assert!(config.traversal.strict_cache);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/aqneo.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = AppConfig::default();
        config.neo4j.user = "from-file".to_string();
        config.apply(ConnectionOverrides {
            uri: Some("bolt://override:7687".to_string()),
            password: Some("pw".to_string()),
            ..ConnectionOverrides::default()
        });
        assert_eq!(config.neo4j.uri, "bolt://override:7687");
        assert_eq!(config.neo4j.user, "from-file");
        assert_eq!(config.neo4j.password, "pw");
    }

    #[test]
    fn test_write_options_never_zero() {
        let mut config = AppConfig::default();
        config.writer.workers = 0;
        config.writer.chunksize = 0;
        let options = config.write_options();
        assert_eq!(options.workers, 1);
        assert_eq!(options.chunksize, 1);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
    }
}

//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration builder for loading configuration from multiple sources
///
/// Sources are layered in the order they are added, on top of
/// [`Config::default`]. Missing files are skipped silently.
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add a configuration file source, format detected from the extension
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add a configuration file source with explicit format
    pub fn add_source_file_with_format<P: AsRef<Path>>(
        mut self,
        path: P,
        format: FileFormat,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        let defaults_value = serde_yaml::to_value(Config::default())
            .map_err(|e| ConfigError::other(format!("Failed to serialize defaults: {e}")))?;
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults_value)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .prefix_separator(&self.env_separator)
                            .separator(&self.env_separator)
                            .try_parsing(true),
                    );
                }
            }
        }

        let config = self.inner.build()?;
        let result: Config = config.try_deserialize()?;

        Self::validate(&result)?;

        Ok(result)
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate the configuration
    ///
    /// Every rule here must hold before a pass is allowed to start.
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.policy.archive_retention_days == 0 {
            return Err(ConfigError::invalid_value(
                "policy.archive_retention_days",
                "must be greater than 0",
            ));
        }

        config
            .remote
            .retry
            .validate()
            .map_err(|message| ConfigError::invalid_value("remote.retry", message))?;

        if config.remote.timeouts.request_timeout.is_zero() {
            return Err(ConfigError::invalid_value(
                "remote.timeouts.request_timeout",
                "must be greater than 0",
            ));
        }

        if config.remote.prefetch_concurrency == 0 {
            return Err(ConfigError::invalid_value(
                "remote.prefetch_concurrency",
                "must be greater than 0",
            ));
        }

        if config.background.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::invalid_value(
                "background.poll_interval",
                "must be at least 1 second",
            ));
        }

        if config.background.failure_threshold == 0 {
            return Err(ConfigError::invalid_value(
                "background.failure_threshold",
                "must be at least 1",
            ));
        }

        if config.background.tick_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "background.tick_interval",
                "must be greater than 0",
            ));
        }

        let extension = &config.folders.extension;
        if extension.is_empty() || extension.starts_with('.') {
            return Err(ConfigError::invalid_value(
                "folders.extension",
                "must be non-empty and must not start with '.'",
            ));
        }

        let archive = config.folders.archive_folder.trim_matches('/');
        if archive.is_empty() {
            return Err(ConfigError::invalid_value(
                "folders.archive_folder",
                "must not be empty",
            ));
        }

        let base = config.folders.local_base.trim_matches('/');
        if !base.is_empty() && (archive == base || archive.starts_with(&format!("{base}/"))) {
            return Err(ConfigError::validation(
                "Archive folder must not be inside the managed local base",
            ));
        }

        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_types::{ConflictPolicy, DeleteHandling};
    use rstest::rstest;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_builder_yaml_file() {
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
policy:
  conflict_policy: last-write-wins
  delete_handling: sync
folders:
  local_base: Notes
  detect_remote_moves: true
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.policy.conflict_policy, ConflictPolicy::LastWriteWins);
        assert_eq!(config.policy.delete_handling, DeleteHandling::Sync);
        assert_eq!(config.folders.local_base, "Notes");
        assert!(config.folders.detect_remote_moves);
        assert_eq!(config.policy.archive_retention_days, 30);
    }

    #[test]
    fn test_builder_toml_file() {
        let mut temp_file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
[policy]
sync_moves = false

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert!(!config.policy.sync_moves);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let config = ConfigBuilder::new()
            .add_source_file("/nonexistent/docsync.yaml")
            .build()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[rstest]
    #[case("policy:\n  archive_retention_days: 0\n", "archive_retention_days")]
    #[case("folders:\n  extension: .md\n", "folders.extension")]
    #[case("folders:\n  extension: ''\n", "folders.extension")]
    #[case("background:\n  failure_threshold: 0\n", "failure_threshold")]
    #[case("logging:\n  level: loud\n", "Log level")]
    #[case(
        "folders:\n  local_base: Notes\n  archive_folder: Notes/archive\n",
        "Archive folder"
    )]
    #[case("remote:\n  retry:\n    backoff_multiplier: 1.0\n", "remote.retry")]
    fn test_builder_validation(#[case] yaml: &str, #[case] expected: &str) {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{yaml}").unwrap();

        let result = ConfigBuilder::new()
            .add_source_file_with_format(temp_file.path(), FileFormat::Yaml)
            .build();

        let message = result.unwrap_err().to_string();
        assert!(message.contains(expected), "{message}");
    }

    #[test]
    fn test_poll_interval_floor() {
        let mut config = Config::default();
        config.background.poll_interval = Duration::from_millis(500);
        assert!(ConfigBuilder::validate(&config).is_err());
        config.background.poll_interval = Duration::from_secs(1);
        assert!(ConfigBuilder::validate(&config).is_ok());
    }
}

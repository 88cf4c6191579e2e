//! Configuration parser for loading configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::DeployConfig;

/// Environment variable overriding `cluster.name`.
pub const ENV_CLUSTER_NAME: &str = "ECSDEPLOY_CLUSTER_NAME";
/// Environment variable overriding `app.name`.
pub const ENV_APP_NAME: &str = "ECSDEPLOY_APP_NAME";
/// Environment variable overriding `app.units`.
pub const ENV_APP_UNITS: &str = "ECSDEPLOY_APP_UNITS";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed configuration for cluster: {}", config.cluster.name);
        Ok(config)
    }

    /// Loads configuration, then applies `ECSDEPLOY_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    fn apply_env_overrides(
        config: &mut DeployConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(name) = lookup(ENV_CLUSTER_NAME) {
            debug!("Overriding cluster.name from environment");
            // An app without an explicit cluster follows the renamed cluster
            config.cluster.name = name;
        }

        if let Some(app) = config.app.as_mut() {
            if let Some(name) = lookup(ENV_APP_NAME) {
                debug!("Overriding app.name from environment");
                app.name = name;
            }

            if let Some(units) = lookup(ENV_APP_UNITS) {
                debug!("Overriding app.units from environment");
                app.units = units.trim().parse().map_err(|_| {
                    DeployError::Config(ConfigError::validation(
                        format!("{ENV_APP_UNITS} must be a whole number, got '{units}'"),
                        "app.units",
                    ))
                })?;
            }
        } else if lookup(ENV_APP_NAME).is_some() || lookup(ENV_APP_UNITS).is_some() {
            warn!("App overrides set in environment but configuration has no app section");
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["ecsdeploy.yaml", "ecsdeploy.yml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeployError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r"
cluster:
  name: cluster1
  image_id: ami-123
app:
  name: echo
  docker:
    image: echo:latest
";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_minimal_config() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(MINIMAL, None).unwrap();

        assert_eq!(config.cluster.name, "cluster1");
        assert_eq!(config.app.as_ref().unwrap().units, 1);
    }

    #[test]
    fn test_parse_error_carries_location() {
        let parser = ConfigParser::new();
        let err = parser
            .parse_yaml("cluster: [", Some(Path::new("broken.yaml")))
            .unwrap_err();

        match err {
            DeployError::Config(ConfigError::ParseError { location, .. }) => {
                assert_eq!(location.as_deref(), Some("broken.yaml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let parser = ConfigParser::new();
        let mut config = parser.parse_yaml(MINIMAL, None).unwrap();

        ConfigParser::apply_env_overrides(
            &mut config,
            lookup(&[
                (ENV_CLUSTER_NAME, "staging"),
                (ENV_APP_NAME, "echo2"),
                (ENV_APP_UNITS, "4"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cluster.name, "staging");
        let app = config.app_spec().unwrap();
        assert_eq!(app.app_name, "echo2");
        assert_eq!(app.unit_count, 4);
        assert_eq!(app.cluster_name, "staging");
    }

    #[test]
    fn test_bad_units_override() {
        let parser = ConfigParser::new();
        let mut config = parser.parse_yaml(MINIMAL, None).unwrap();

        let result =
            ConfigParser::apply_env_overrides(&mut config, lookup(&[(ENV_APP_UNITS, "many")]));
        assert!(matches!(
            result,
            Err(DeployError::Config(ConfigError::ValidationError { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ecsdeploy.yml"), MINIMAL).unwrap();
        let nested = dir.path().join("services").join("echo");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("ecsdeploy.yml"));

        let config = ConfigParser::new().load_file(&found).unwrap();
        assert_eq!(config.cluster.image_id, "ami-123");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigParser::new().load_file(dir.path().join("nope.yaml"));
        assert!(matches!(
            result,
            Err(DeployError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}

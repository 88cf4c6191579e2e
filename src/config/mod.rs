//! Configuration module for ecsdeploy.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `ecsdeploy.yaml`
//! - Validation of configuration values
//! - Conversion of user units into provider units
//! - Computing desired-state fingerprints

mod hash;
mod parser;
mod spec;
pub mod units;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_APP_NAME, ENV_APP_UNITS, ENV_CLUSTER_NAME,
    find_config_file,
};
pub use spec::{
    AppConfig, ClusterConfig, DeployConfig, DockerConfig, HealthCheckConfig, LoadBalancerConfig,
    LoggingConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};

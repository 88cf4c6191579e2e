//! Configuration validation.
//!
//! Checks names, ranges and unit expressions before anything touches the
//! provider. All problems are collected so a user sees every one of them
//! at once; the first error is also returned as the failure.

use crate::error::{ConfigError, DeployError, Result};
use crate::model::{ANYWHERE, SecurityGroupSource};
use tracing::debug;

use super::spec::{AppConfig, ClusterConfig, DeployConfig, HealthCheckConfig, LoadBalancerConfig};
use super::units::{cpu_units, duration_secs, memory_mib};

/// Healthy and unhealthy thresholds the provider accepts.
const THRESHOLD_RANGE: std::ops::RangeInclusive<u32> = 2..=10;

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            Err(DeployError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        } else {
            debug!("Configuration validation passed");
            Ok(result)
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_cluster(&config.cluster, &mut result);
        if let Some(app) = &config.app {
            Self::validate_app(app, &config.cluster.name, &mut result);
        }

        result
    }

    fn validate_cluster(cluster: &ClusterConfig, result: &mut ValidationResult) {
        if !is_valid_name(&cluster.name) {
            result.error(
                "cluster.name",
                format!(
                    "Cluster name '{}' is invalid. Must start with a letter and contain only letters, digits, '-' or '_'.",
                    cluster.name
                ),
            );
        }

        if cluster.image_id.trim().is_empty() {
            result.error("cluster.image_id", "Machine image cannot be empty");
        }

        if cluster.instance_type.trim().is_empty() {
            result.error("cluster.instance_type", "Instance type cannot be empty");
        }

        if cluster.initial_capacity == 0 {
            result.error(
                "cluster.initial_capacity",
                "Initial capacity must be at least 1",
            );
        }

        if cluster.key_pair.is_none() {
            result
                .warnings
                .push(String::from("cluster.key_pair: No key pair, instances will not be reachable over SSH"));
        }
    }

    fn validate_app(app: &AppConfig, cluster_name: &str, result: &mut ValidationResult) {
        if !is_valid_name(&app.name) {
            result.error(
                "app.name",
                format!(
                    "App name '{}' is invalid. Must start with a letter and contain only letters, digits, '-' or '_'.",
                    app.name
                ),
            );
        }

        if let Some(cluster) = &app.cluster {
            if cluster != cluster_name {
                result.warnings.push(format!(
                    "app.cluster: App targets cluster '{cluster}', not the configured cluster '{cluster_name}'"
                ));
            }
        }

        if let Err(e) = cpu_units(app.cpu) {
            result.error("app.cpu", e.to_string());
        }

        if let Err(e) = memory_mib(&app.memory) {
            result.error("app.memory", e.to_string());
        }

        if app.units == 0 {
            result
                .warnings
                .push(String::from("app.units: Service will run no tasks"));
        }

        if app.port == Some(0) {
            result.error("app.port", "Container port must be between 1 and 65535");
        }

        match (&app.docker.image, &app.docker.build_path) {
            (Some(_), Some(_)) => result.error(
                "app.docker",
                "Set either docker.image or docker.build_path, not both",
            ),
            (Some(image), None) => {
                if image.trim().is_empty() {
                    result.error("app.docker.image", "Container image cannot be empty");
                } else if image.ends_with(":latest") {
                    result.warnings.push(String::from(
                        "app.docker.image: Using ':latest' tag makes deployments hard to track",
                    ));
                }
            }
            _ => {}
        }

        if let Some(lb) = app.load_balancer.as_ref().filter(|lb| lb.enabled) {
            if app.port.is_none() {
                result.error(
                    "app.port",
                    "Load balancing needs a container port to route to",
                );
            }
            Self::validate_load_balancer(lb, result);
        }
    }

    fn validate_load_balancer(lb: &LoadBalancerConfig, result: &mut ValidationResult) {
        if lb.port == 0 {
            result.error(
                "app.load_balancer.port",
                "Listener port must be between 1 and 65535",
            );
        }

        if lb.certificate.is_some() && lb.port == 80 {
            result.warnings.push(String::from(
                "app.load_balancer.certificate: HTTPS listener on port 80",
            ));
        }

        if let Some(group) = &lb.security_group {
            if matches!(SecurityGroupSource::parse(group), SecurityGroupSource::Cidr(_))
                && lb.ingress_source != ANYWHERE
            {
                result.warnings.push(String::from(
                    "app.load_balancer.ingress_source: Ignored, security_group is a CIDR block",
                ));
            }
        }

        Self::validate_health_check(&lb.health_check, result);
    }

    fn validate_health_check(check: &HealthCheckConfig, result: &mut ValidationResult) {
        if !check.path.starts_with('/') {
            result.error(
                "app.load_balancer.health_check.path",
                format!("Health check path must be absolute: {}", check.path),
            );
        }

        let interval = duration_secs(&check.interval);
        let timeout = duration_secs(&check.timeout);
        if let Err(e) = &interval {
            result.error("app.load_balancer.health_check.interval", e.to_string());
        }
        if let Err(e) = &timeout {
            result.error("app.load_balancer.health_check.timeout", e.to_string());
        }
        if let (Ok(interval), Ok(timeout)) = (interval, timeout) {
            if timeout >= interval {
                result.error(
                    "app.load_balancer.health_check.timeout",
                    format!("Timeout ({timeout}s) must be shorter than the interval ({interval}s)"),
                );
            }
        }

        for (field, value) in [
            ("healthy_limit", check.healthy_limit),
            ("unhealthy_limit", check.unhealthy_limit),
        ] {
            if !THRESHOLD_RANGE.contains(&value) {
                result.error(
                    format!("app.load_balancer.health_check.{field}"),
                    format!(
                        "Must be between {} and {}, got {value}",
                        THRESHOLD_RANGE.start(),
                        THRESHOLD_RANGE.end()
                    ),
                );
            }
        }
    }
}

/// Names must start with a letter and contain letters, digits, `-` or `_`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("cluster1"));
        assert!(is_valid_name("my-app_2"));
        assert!(is_valid_name("A"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1cluster")); // starts with digit
        assert!(!is_valid_name("my app")); // space
        assert!(!is_valid_name("app/x"));
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let config = parse(
            r"
cluster:
  name: cluster1
  image_id: ami-123
app:
  name: echo
  port: 8080
  docker:
    image: echo:latest
  load_balancer:
    port: 80
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();

        assert!(result.is_valid());
        // no key pair, latest tag
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_collects_every_error() {
        let config = parse(
            r"
cluster:
  name: 9lives
  image_id: ''
  initial_capacity: 0
app:
  name: echo
  memory: lots
  cpu: 0
  docker:
    image: echo:v1
    build_path: ./echo
  load_balancer:
    health_check:
      interval: 5s
      timeout: 10s
      healthy_limit: 1
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"cluster.name"));
        assert!(fields.contains(&"cluster.image_id"));
        assert!(fields.contains(&"cluster.initial_capacity"));
        assert!(fields.contains(&"app.memory"));
        assert!(fields.contains(&"app.cpu"));
        assert!(fields.contains(&"app.docker"));
        assert!(fields.contains(&"app.port"));
        assert!(fields.contains(&"app.load_balancer.health_check.timeout"));
        assert!(fields.contains(&"app.load_balancer.health_check.healthy_limit"));

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("Cluster name '9lives'"));
    }

    #[test]
    fn test_disabled_load_balancer_needs_no_port() {
        let config = parse(
            r"
cluster:
  name: cluster1
  image_id: ami-123
  key_pair: ops
app:
  name: worker
  docker:
    build_path: ./worker
  load_balancer:
    enabled: false
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warning_count(), 0);
    }
}

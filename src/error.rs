//! Error types for the ecsdeploy provisioning system.
//!
//! The hierarchy follows the error taxonomy of the reconciliation engine:
//! configuration errors abort immediately, provider errors carry a
//! machine-readable code used for transient-retry classification, and
//! reconciliation errors describe exhausted waits and aborted runs.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::ResourceKind;

/// Well-known provider error codes.
pub mod codes {
    /// The addressed resource does not exist.
    pub const NOT_FOUND: &str = "NotFound";
    /// The resource is still referenced by another resource or still busy.
    pub const RESOURCE_IN_USE: &str = "ResourceInUse";
    /// A dependent object still references the resource being deleted.
    pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
    /// A freshly created instance profile is not yet visible to the compute API.
    pub const INVALID_INSTANCE_PROFILE: &str = "InvalidInstanceProfile";
    /// The provider is rate limiting requests.
    pub const THROTTLING: &str = "Throttling";
    /// A resource with the same name already exists.
    pub const ALREADY_EXISTS: &str = "AlreadyExists";
    /// The request was malformed or referenced something invalid.
    pub const VALIDATION: &str = "ValidationError";
}

/// The main error type for ecsdeploy.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors. Never retried.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A provider call failed for a specific resource.
    #[error("{kind} '{name}': {source}")]
    Provider {
        /// Kind of resource the call targeted.
        kind: ResourceKind,
        /// Name or identifier of the resource.
        name: String,
        /// The underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Sandbox state could not be read or written.
    #[error("Sandbox state error: {0}")]
    Sandbox(#[from] SandboxError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// An error reported by the cloud provider.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A size, CPU or time expression could not be converted.
    #[error("Invalid {field} value '{value}': {reason}")]
    InvalidUnit {
        /// Field holding the expression.
        field: String,
        /// The offending expression.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Load balancing needs a container port mapping but none is configured.
    #[error("Application '{app}' enables load balancing but has no container port")]
    PortRequired {
        /// Application name.
        app: String,
    },

    /// Load balancer and target group exist but no listener links them.
    #[error(
        "Load balancer '{load_balancer}' and target group '{target_group}' both exist but no listener links them"
    )]
    AmbiguousListener {
        /// Load balancer name.
        load_balancer: String,
        /// Target group name.
        target_group: String,
    },

    /// A user-supplied instance profile does not exist.
    #[error("Instance profile not found: {name}")]
    InstanceProfileNotFound {
        /// Name of the missing profile.
        name: String,
    },

    /// The scheduler cluster an application targets is missing or inactive.
    #[error("Cluster '{cluster}' does not exist or is not active; create it first")]
    ClusterNotReady {
        /// Derived scheduler cluster name.
        cluster: String,
    },
}

/// Errors of the on-disk sandbox state.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The state file exists but cannot be parsed.
    #[error("State file is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The state file cannot be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Maximum retry attempts exceeded on a transient provider error.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// The last transient error observed.
        last_error: String,
    },

    /// A polling wait did not reach its terminal condition in time.
    #[error("Timed out after {attempts} polls waiting for {resource} to {condition}")]
    WaitTimeout {
        /// Resource being waited on.
        resource: String,
        /// Terminal condition that was not reached.
        condition: String,
        /// Number of polls performed.
        attempts: u32,
    },

    /// A plan step required by the apply phase is missing.
    #[error("Plan has no step for {kind} '{name}'")]
    MissingStep {
        /// Kind of the missing step.
        kind: ResourceKind,
        /// Name of the missing step.
        name: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for ecsdeploy operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the provider error code, if this is a provider error.
    #[must_use]
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Provider { source, .. } => Some(source.code.as_str()),
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl ProviderError {
    /// Creates a provider error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(codes::NOT_FOUND, message)
    }

    /// Returns true if the code signals a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == codes::NOT_FOUND
    }

    /// Returns true if the code is one of the given codes.
    #[must_use]
    pub fn has_code(&self, codes: &[&str]) -> bool {
        codes.iter().any(|c| self.code == *c)
    }

    /// Returns true if retrying the call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.has_code(&[
            codes::RESOURCE_IN_USE,
            codes::DEPENDENCY_VIOLATION,
            codes::INVALID_INSTANCE_PROFILE,
            codes::THROTTLING,
        ])
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a unit conversion error.
    #[must_use]
    pub fn invalid_unit(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidUnit {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Attaches resource context to raw provider results.
pub trait ProviderResultExt<T> {
    /// Converts a provider error into a [`DeployError::Provider`] for the given resource.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error if the call failed.
    fn for_resource(self, kind: ResourceKind, name: &str) -> Result<T>;
}

impl<T> ProviderResultExt<T> for std::result::Result<T, ProviderError> {
    fn for_resource(self, kind: ResourceKind, name: &str) -> Result<T> {
        self.map_err(|source| DeployError::Provider {
            kind,
            name: name.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::new(codes::DEPENDENCY_VIOLATION, "in use").is_transient());
        assert!(ProviderError::new(codes::INVALID_INSTANCE_PROFILE, "lag").is_transient());
        assert!(!ProviderError::new(codes::VALIDATION, "bad").is_transient());
        assert!(!ProviderError::not_found("gone").is_transient());
    }

    #[test]
    fn test_for_resource_keeps_code() {
        let raw: std::result::Result<(), ProviderError> =
            Err(ProviderError::new(codes::RESOURCE_IN_USE, "busy"));
        let err = raw
            .for_resource(ResourceKind::SecurityGroup, "sg-1")
            .unwrap_err();

        assert_eq!(err.provider_code(), Some(codes::RESOURCE_IN_USE));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("sg-1"));
    }
}

//! Desired-state inputs of the reconcilers.
//!
//! These are built by the configuration layer after validation and
//! defaulting, and are read-only during a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Open CIDR block used when no ingress source is given.
pub const ANYWHERE: &str = "0.0.0.0/0";

/// Desired compute and scheduler cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name; every cluster resource name derives from it.
    pub cluster_name: String,
    /// Instance type of cluster instances.
    pub instance_type: String,
    /// Machine image of cluster instances.
    pub image_id: String,
    /// Key pair for SSH access.
    pub key_pair_name: Option<String>,
    /// Desired, minimum and maximum size of the autoscaling group.
    pub initial_capacity: u32,
    /// Existing instance profile to use instead of creating one.
    pub instance_profile_name: Option<String>,
    /// Network to place the cluster in; the default network when `None`.
    pub network_id: Option<String>,
}

/// Desired application deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    /// Application name.
    pub app_name: String,
    /// Cluster the application runs on.
    pub cluster_name: String,
    /// Container port; required when load balancing is enabled.
    pub port: Option<u16>,
    /// CPU in cores (fractions allowed).
    pub cpu: f64,
    /// Memory as a size expression, e.g. `512m`.
    pub memory: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Number of running tasks.
    pub unit_count: u32,
    /// Where the container image comes from.
    pub image: ImageSource,
    /// Optional container log driver.
    pub logging: Option<LogSpec>,
    /// Optional load balancing.
    pub load_balancer: Option<LoadBalancerSpec>,
}

impl AppSpec {
    /// Returns true if the application is exposed through a load balancer.
    #[must_use]
    pub const fn is_load_balanced(&self) -> bool {
        self.load_balancer.is_some()
    }
}

/// Source of the application's container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// A prebuilt image reference used as-is.
    Image(String),
    /// Build from a local context and push to the application repository.
    Build {
        /// Build context directory.
        path: String,
        /// Image tag.
        tag: String,
    },
    /// An image already pushed to the application repository.
    Repository {
        /// Image tag.
        tag: String,
    },
}

/// Container log driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSpec {
    /// Driver name, e.g. `awslogs`.
    pub driver: String,
    /// Driver options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Load balancer exposure of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    /// Name of an existing or shared load balancer; derived from the app name when `None`.
    pub name: Option<String>,
    /// Listener port.
    pub port: u16,
    /// Target group health check.
    pub health_check: HealthCheckSpec,
    /// Existing security group (name, id or CIDR) to use instead of creating one.
    pub security_group: Option<String>,
    /// Certificate for an HTTPS listener.
    pub certificate: Option<String>,
    /// Where listener traffic may come from when a security group is created.
    pub ingress_source: String,
}

/// Target group health check, in user units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Path probed.
    pub path: String,
    /// Accepted status codes.
    pub status: String,
    /// Time between probes, e.g. `30s`.
    pub interval: String,
    /// Probe timeout, e.g. `5s`.
    pub timeout: String,
    /// Consecutive successes before healthy.
    pub healthy_limit: u32,
    /// Consecutive failures before unhealthy.
    pub unhealthy_limit: u32,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: String::from("/"),
            status: String::from("200-299"),
            interval: String::from("30s"),
            timeout: String::from("5s"),
            healthy_limit: 5,
            unhealthy_limit: 2,
        }
    }
}

/// How a user-supplied security group reference is interpreted.
///
/// The classification is a loose heuristic: an `sg-` prefix is a group id,
/// something shaped like an IPv4 CIDR is a block, everything else is a
/// group name. Malformed CIDRs such as `999.1/8` are still taken as
/// blocks and rejected later by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityGroupSource {
    /// A security group id.
    GroupId(String),
    /// A CIDR block.
    Cidr(String),
    /// A security group name.
    Name(String),
}

static CIDR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9.]+/[0-9]{1,2}$").ok());

impl SecurityGroupSource {
    /// Classifies a reference.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with("sg-") {
            return Self::GroupId(value.to_string());
        }
        let is_cidr = CIDR_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(value));
        if is_cidr {
            Self::Cidr(value.to_string())
        } else {
            Self::Name(value.to_string())
        }
    }
}

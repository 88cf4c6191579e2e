//! Resource kinds, observed resources and request parameters.
//!
//! Observed types describe what a probe returns. Parameter types describe
//! what a create call sends. Both are plain data; all provider behavior
//! lives behind the traits in `api`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tags attached to a cloud resource.
pub type Tags = BTreeMap<String, String>;

/// Every kind of resource the system manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Network and its subnets.
    Network,
    /// IAM role (instance role or scheduler service role).
    Role,
    /// IAM instance profile.
    InstanceProfile,
    /// Network security group.
    SecurityGroup,
    /// Launch configuration for cluster instances.
    LaunchConfiguration,
    /// Autoscaling group of cluster instances.
    AutoScalingGroup,
    /// Scheduler (container) cluster.
    Cluster,
    /// Task definition revision.
    TaskDefinition,
    /// Scheduler service running the application.
    Service,
    /// Image repository.
    Repository,
    /// Application load balancer.
    LoadBalancer,
    /// Load balancer target group.
    TargetGroup,
    /// Load balancer listener.
    Listener,
}

impl ResourceKind {
    /// Returns a short human-readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Role => "IAM role",
            Self::InstanceProfile => "instance profile",
            Self::SecurityGroup => "security group",
            Self::LaunchConfiguration => "launch configuration",
            Self::AutoScalingGroup => "autoscaling group",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task definition",
            Self::Service => "service",
            Self::Repository => "repository",
            Self::LoadBalancer => "load balancer",
            Self::TargetGroup => "target group",
            Self::Listener => "listener",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The probed state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// Provider-assigned id or ARN; `None` when the resource is absent.
    pub identifier: Option<String>,
    /// Tags observed on the resource.
    #[serde(default)]
    pub tags: Tags,
}

impl ResourceRef {
    /// A reference to a resource that does not exist yet.
    #[must_use]
    pub fn absent(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            identifier: None,
            tags: Tags::new(),
        }
    }

    /// A reference to an existing resource.
    #[must_use]
    pub fn present(kind: ResourceKind, name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            identifier: Some(identifier.into()),
            tags: Tags::new(),
        }
    }

    /// Attaches observed tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Returns true if the resource exists.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.identifier.is_some()
    }
}

/// IAM role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name.
    pub name: String,
    /// Role ARN.
    pub arn: String,
    /// Trust policy document.
    pub trust_policy: String,
    /// ARNs of attached managed policies.
    #[serde(default)]
    pub attached_policies: Vec<String>,
}

/// IAM instance profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProfile {
    /// Profile name.
    pub name: String,
    /// Profile ARN.
    pub arn: String,
    /// Names of roles bound to the profile.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Source of traffic allowed by an ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressSource {
    /// A CIDR block, e.g. `0.0.0.0/0`.
    Cidr(String),
    /// Another security group, by id.
    Group(String),
}

/// An inbound security group rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// IP protocol (`tcp`, `udp`).
    pub protocol: String,
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range.
    pub to_port: u16,
    /// Where traffic may come from.
    pub source: IngressSource,
}

impl IngressRule {
    /// A TCP rule for a single port.
    #[must_use]
    pub fn tcp(port: u16, source: IngressSource) -> Self {
        Self::tcp_range(port, port, source)
    }

    /// A TCP rule for a port range.
    #[must_use]
    pub fn tcp_range(from_port: u16, to_port: u16, source: IngressSource) -> Self {
        Self {
            protocol: String::from("tcp"),
            from_port,
            to_port,
            source,
        }
    }
}

/// Network security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Group id (`sg-...`).
    pub id: String,
    /// Group name.
    pub name: String,
    /// Network the group belongs to.
    pub network_id: String,
    /// Group description.
    #[serde(default)]
    pub description: String,
    /// Inbound rules.
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

impl SecurityGroup {
    /// Returns true if any ingress rule admits traffic from the given group.
    #[must_use]
    pub fn allows_group(&self, group_id: &str) -> bool {
        self.ingress
            .iter()
            .any(|r| matches!(&r.source, IngressSource::Group(g) if g == group_id))
    }
}

/// Parameters for creating a security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupParams {
    /// Group name.
    pub name: String,
    /// Group description.
    pub description: String,
    /// Network to create the group in.
    pub network_id: String,
}

/// Launch configuration for cluster instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    /// Configuration name.
    pub name: String,
    /// Instance profile the instances run with.
    pub instance_profile: String,
    /// Instance type.
    pub instance_type: String,
    /// Machine image id.
    pub image_id: String,
    /// Optional key pair name.
    #[serde(default)]
    pub key_pair: Option<String>,
    /// Security group ids.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Boot-time script.
    #[serde(default)]
    pub user_data: String,
}

/// Parameters for creating a launch configuration.
pub type LaunchConfigurationParams = LaunchConfiguration;

/// Autoscaling group status reported while deletion is in progress.
pub const GROUP_DELETING: &str = "Delete in progress";

/// Autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    /// Group name.
    pub name: String,
    /// Group ARN.
    pub arn: String,
    /// Launch configuration name.
    pub launch_configuration: String,
    /// Desired capacity.
    pub desired: u32,
    /// Minimum size.
    pub min: u32,
    /// Maximum size.
    pub max: u32,
    /// Number of instances currently in the group.
    pub instance_count: u32,
    /// Provider status, set while the group is being deleted.
    #[serde(default)]
    pub status: Option<String>,
    /// Subnets the group spans.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

impl AutoScalingGroup {
    /// Returns true if the group is being deleted.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.status.as_deref() == Some(GROUP_DELETING)
    }
}

/// Parameters for creating an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoScalingGroupParams {
    /// Group name.
    pub name: String,
    /// Launch configuration name.
    pub launch_configuration: String,
    /// Subnets to span.
    pub subnets: Vec<String>,
    /// Desired capacity.
    pub desired: u32,
    /// Minimum size.
    pub min: u32,
    /// Maximum size.
    pub max: u32,
}

/// Status of an active scheduler cluster or service.
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Status of a service that is being deleted.
pub const STATUS_DRAINING: &str = "DRAINING";
/// Status of a deleted cluster or service.
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// Scheduler (container) cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name.
    pub name: String,
    /// Cluster ARN.
    pub arn: String,
    /// Cluster status.
    pub status: String,
}

impl Cluster {
    /// Returns true if the cluster is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Port mapping of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container port.
    pub container_port: u16,
    /// Host port; zero lets the scheduler pick one.
    pub host_port: u16,
    /// Protocol.
    pub protocol: String,
}

/// Container log driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfiguration {
    /// Log driver name.
    pub driver: String,
    /// Driver options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A container within a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// CPU in provider units (1024 per core).
    pub cpu: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
    /// Port mappings.
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Optional log driver configuration.
    #[serde(default)]
    pub log_configuration: Option<LogConfiguration>,
}

/// Parameters for registering a task definition revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinitionParams {
    /// Task definition family.
    pub family: String,
    /// The single application container.
    pub container: ContainerDefinition,
}

/// A registered task definition revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task definition family.
    pub family: String,
    /// Revision number, starting at 1.
    pub revision: u32,
    /// Revision ARN.
    pub arn: String,
    /// Container definition.
    pub container: ContainerDefinition,
}

/// Binding between a service and a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLoadBalancer {
    /// Target group ARN.
    pub target_group_arn: String,
    /// Container receiving traffic.
    pub container_name: String,
    /// Container port receiving traffic.
    pub container_port: u16,
}

/// Rollout policy of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    /// Upper bound on running tasks during a rollout, in percent of desired.
    pub maximum_percent: u32,
    /// Lower bound on healthy tasks during a rollout, in percent of desired.
    pub minimum_healthy_percent: u32,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            maximum_percent: 200,
            minimum_healthy_percent: 50,
        }
    }
}

/// Scheduler service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name.
    pub name: String,
    /// Service ARN.
    pub arn: String,
    /// Cluster the service runs in.
    pub cluster: String,
    /// Service status.
    pub status: String,
    /// Task definition ARN in use.
    pub task_definition: String,
    /// Desired task count.
    pub desired_count: u32,
    /// Running task count.
    pub running_count: u32,
    /// Load balancer bindings.
    #[serde(default)]
    pub load_balancers: Vec<ServiceLoadBalancer>,
    /// Role the scheduler uses to manage the load balancer.
    #[serde(default)]
    pub role: Option<String>,
    /// Rollout policy.
    pub deployment: DeploymentPolicy,
}

impl Service {
    /// Returns true if the service is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Returns true if the service is draining towards inactive.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.status == STATUS_DRAINING
    }
}

/// Parameters for creating a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParams {
    /// Service name.
    pub name: String,
    /// Cluster to run in.
    pub cluster: String,
    /// Task definition ARN.
    pub task_definition: String,
    /// Desired task count.
    pub desired_count: u32,
    /// Role for load balancer management.
    pub role: Option<String>,
    /// Optional load balancer binding.
    pub load_balancer: Option<ServiceLoadBalancer>,
    /// Rollout policy.
    pub deployment: DeploymentPolicy,
}

/// In-place service update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// New task definition ARN, if changing.
    pub task_definition: Option<String>,
    /// New desired count, if changing.
    pub desired_count: Option<u32>,
}

/// Image repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Repository ARN.
    pub arn: String,
    /// Repository URI used in image references.
    pub uri: String,
}

impl Repository {
    /// Returns the registry host part of the repository URI.
    #[must_use]
    pub fn registry(&self) -> &str {
        self.uri.split('/').next().unwrap_or(&self.uri)
    }
}

/// Credentials returned by a registry login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Registry endpoint.
    pub endpoint: String,
    /// User name.
    pub username: String,
    /// Password or token.
    pub password: String,
}

/// Application load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Load balancer name.
    pub name: String,
    /// Load balancer ARN.
    pub arn: String,
    /// Public DNS name.
    pub dns_name: String,
    /// Security group ids.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Subnets.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Parameters for creating a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerParams {
    /// Load balancer name.
    pub name: String,
    /// Subnets to span.
    pub subnets: Vec<String>,
    /// Security group ids.
    pub security_groups: Vec<String>,
}

/// Target group health check parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckParams {
    /// HTTP path probed.
    pub path: String,
    /// Accepted status codes, e.g. `200-299`.
    pub matcher: String,
    /// Seconds between probes.
    pub interval_secs: u32,
    /// Seconds before a probe times out.
    pub timeout_secs: u32,
    /// Consecutive successes before healthy.
    pub healthy_threshold: u32,
    /// Consecutive failures before unhealthy.
    pub unhealthy_threshold: u32,
}

/// Load balancer target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Target group name.
    pub name: String,
    /// Target group ARN.
    pub arn: String,
    /// Traffic port.
    pub port: u16,
    /// Protocol.
    pub protocol: String,
    /// Network of the targets.
    pub network_id: String,
    /// Health check.
    pub health_check: HealthCheckParams,
}

/// Parameters for creating a target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroupParams {
    /// Target group name.
    pub name: String,
    /// Traffic port.
    pub port: u16,
    /// Protocol.
    pub protocol: String,
    /// Network of the targets.
    pub network_id: String,
    /// Health check.
    pub health_check: HealthCheckParams,
}

/// Load balancer listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Listener ARN.
    pub arn: String,
    /// Load balancer ARN.
    pub load_balancer_arn: String,
    /// Listening port.
    pub port: u16,
    /// Protocol (`HTTP` or `HTTPS`).
    pub protocol: String,
    /// Certificate for HTTPS listeners.
    #[serde(default)]
    pub certificate: Option<String>,
    /// Target group traffic is forwarded to.
    pub target_group_arn: String,
}

/// Parameters for creating a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerParams {
    /// Load balancer ARN.
    pub load_balancer_arn: String,
    /// Listening port.
    pub port: u16,
    /// Protocol (`HTTP` or `HTTPS`).
    pub protocol: String,
    /// Certificate for HTTPS listeners.
    pub certificate: Option<String>,
    /// Target group to forward to.
    pub target_group_arn: String,
}

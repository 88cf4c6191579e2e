//! Configuration file types.
//!
//! This module defines the structs that map to `ecsdeploy.yaml`. They stay
//! close to what a user writes; [`DeployConfig::cluster_spec`] and
//! [`DeployConfig::app_spec`] turn them into the domain specs the
//! reconcilers consume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::model::{
    ANYWHERE, AppSpec, ClusterSpec, HealthCheckSpec, ImageSource, LoadBalancerSpec, LogSpec,
};

/// The root of `ecsdeploy.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Cluster the application runs on.
    pub cluster: ClusterConfig,
    /// Optional application deployed onto the cluster.
    #[serde(default)]
    pub app: Option<AppConfig>,
}

/// Cluster section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,
    /// Instance type of the cluster instances.
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    /// Machine image of the cluster instances.
    pub image_id: String,
    /// Key pair for SSH access.
    #[serde(default)]
    pub key_pair: Option<String>,
    /// Number of instances.
    #[serde(default = "default_capacity")]
    pub initial_capacity: u32,
    /// Existing instance profile to run the instances with.
    #[serde(default)]
    pub instance_profile: Option<String>,
    /// Network to place the cluster in.
    #[serde(default)]
    pub network: Option<String>,
}

/// Application section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Application name.
    pub name: String,
    /// Cluster to run on; the configured cluster when omitted.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Container port.
    #[serde(default)]
    pub port: Option<u16>,
    /// CPU in cores.
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    /// Memory size expression.
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Number of running tasks.
    #[serde(default = "default_units")]
    pub units: u32,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Image source.
    pub docker: DockerConfig,
    /// Container logging.
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Load balancer exposure.
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
}

/// Where the application image comes from.
///
/// Exactly one of `image` and `build_path` is expected; with neither, the
/// image is pulled from the application repository at `tag`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DockerConfig {
    /// Prebuilt image reference.
    #[serde(default)]
    pub image: Option<String>,
    /// Build context directory.
    #[serde(default)]
    pub build_path: Option<String>,
    /// Tag for built or repository images.
    #[serde(default = "default_tag")]
    pub tag: String,
}

/// Container log driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Driver name.
    pub driver: String,
    /// Driver options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Load balancer section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    /// Whether the application is load balanced.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Existing or shared load balancer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Listener port.
    #[serde(default = "default_listener_port")]
    pub port: u16,
    /// Target group health check.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Security group id, name or CIDR block.
    #[serde(default)]
    pub security_group: Option<String>,
    /// Certificate reference for HTTPS.
    #[serde(default)]
    pub certificate: Option<String>,
    /// CIDR block allowed to reach the listener.
    #[serde(default = "default_ingress_source")]
    pub ingress_source: String,
}

/// Health check section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Path probed.
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Accepted status codes.
    #[serde(default = "default_health_status")]
    pub status: String,
    /// Time between probes.
    #[serde(default = "default_health_interval")]
    pub interval: String,
    /// Probe timeout.
    #[serde(default = "default_health_timeout")]
    pub timeout: String,
    /// Consecutive successes before healthy.
    #[serde(default = "default_healthy_limit")]
    pub healthy_limit: u32,
    /// Consecutive failures before unhealthy.
    #[serde(default = "default_unhealthy_limit")]
    pub unhealthy_limit: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        let defaults = HealthCheckSpec::default();
        Self {
            path: defaults.path,
            status: defaults.status,
            interval: defaults.interval,
            timeout: defaults.timeout,
            healthy_limit: defaults.healthy_limit,
            unhealthy_limit: defaults.unhealthy_limit,
        }
    }
}

impl DeployConfig {
    /// Builds the cluster spec.
    #[must_use]
    pub fn cluster_spec(&self) -> ClusterSpec {
        let c = &self.cluster;
        ClusterSpec {
            cluster_name: c.name.clone(),
            instance_type: c.instance_type.clone(),
            image_id: c.image_id.clone(),
            key_pair_name: c.key_pair.clone(),
            initial_capacity: c.initial_capacity,
            instance_profile_name: c.instance_profile.clone(),
            network_id: c.network.clone(),
        }
    }

    /// Builds the application spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has no `app` section.
    pub fn app_spec(&self) -> Result<AppSpec, ConfigError> {
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| ConfigError::validation("no app section in configuration", "app"))?;

        let image = match (&app.docker.image, &app.docker.build_path) {
            (Some(image), _) => ImageSource::Image(image.clone()),
            (None, Some(path)) => ImageSource::Build {
                path: path.clone(),
                tag: app.docker.tag.clone(),
            },
            (None, None) => ImageSource::Repository {
                tag: app.docker.tag.clone(),
            },
        };

        let load_balancer = app
            .load_balancer
            .as_ref()
            .filter(|lb| lb.enabled)
            .map(|lb| LoadBalancerSpec {
                name: lb.name.clone(),
                port: lb.port,
                health_check: HealthCheckSpec {
                    path: lb.health_check.path.clone(),
                    status: lb.health_check.status.clone(),
                    interval: lb.health_check.interval.clone(),
                    timeout: lb.health_check.timeout.clone(),
                    healthy_limit: lb.health_check.healthy_limit,
                    unhealthy_limit: lb.health_check.unhealthy_limit,
                },
                security_group: lb.security_group.clone(),
                certificate: lb.certificate.clone(),
                ingress_source: lb.ingress_source.clone(),
            });

        Ok(AppSpec {
            app_name: app.name.clone(),
            cluster_name: app
                .cluster
                .clone()
                .unwrap_or_else(|| self.cluster.name.clone()),
            port: app.port,
            cpu: app.cpu,
            memory: app.memory.clone(),
            env: app.env.clone(),
            unit_count: app.units,
            image,
            logging: app.logging.as_ref().map(|l| LogSpec {
                driver: l.driver.clone(),
                options: l.options.clone(),
            }),
            load_balancer,
        })
    }
}

fn default_instance_type() -> String {
    String::from("t2.micro")
}

const fn default_capacity() -> u32 {
    1
}

const fn default_cpu() -> f64 {
    0.25
}

fn default_memory() -> String {
    String::from("512m")
}

const fn default_units() -> u32 {
    1
}

fn default_tag() -> String {
    String::from("latest")
}

const fn default_true() -> bool {
    true
}

const fn default_listener_port() -> u16 {
    80
}

fn default_ingress_source() -> String {
    ANYWHERE.to_string()
}

fn default_health_path() -> String {
    HealthCheckSpec::default().path
}

fn default_health_status() -> String {
    HealthCheckSpec::default().status
}

fn default_health_interval() -> String {
    HealthCheckSpec::default().interval
}

fn default_health_timeout() -> String {
    HealthCheckSpec::default().timeout
}

fn default_healthy_limit() -> u32 {
    HealthCheckSpec::default().healthy_limit
}

fn default_unhealthy_limit() -> u32 {
    HealthCheckSpec::default().unhealthy_limit
}

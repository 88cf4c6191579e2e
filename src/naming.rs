//! Deterministic resource naming.
//!
//! Every resource name is derived from the cluster or application name
//! and a fixed prefix. Names that the provider limits in length are
//! truncated by keeping their leading characters, so the same input
//! always maps to the same name and repeated runs find what earlier runs
//! created.

/// Default prefix of every derived name.
pub const DEFAULT_PREFIX: &str = "ecsdeploy";

/// Maximum length of load balancer and target group names.
pub const MAX_LOAD_BALANCER_NAME: usize = 32;

/// Maximum length of IAM role and profile names.
pub const MAX_IAM_NAME: usize = 64;

/// Maximum length of security group, launch configuration and group names.
pub const MAX_GENERIC_NAME: usize = 255;

/// Derives resource names from cluster and application names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    prefix: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Naming {
    /// Creates a naming scheme with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Scheduler cluster name.
    #[must_use]
    pub fn cluster(&self, cluster: &str) -> String {
        truncate(&format!("{}-{cluster}", self.prefix), MAX_GENERIC_NAME)
    }

    /// Launch configuration name.
    #[must_use]
    pub fn launch_configuration(&self, cluster: &str) -> String {
        truncate(&format!("{}-{cluster}-lc", self.prefix), MAX_GENERIC_NAME)
    }

    /// Autoscaling group name.
    #[must_use]
    pub fn auto_scaling_group(&self, cluster: &str) -> String {
        truncate(&format!("{}-{cluster}-asg", self.prefix), MAX_GENERIC_NAME)
    }

    /// Role assumed by cluster instances.
    #[must_use]
    pub fn instance_role(&self, cluster: &str) -> String {
        truncate(&format!("{}_{cluster}_instance_role", self.prefix), MAX_IAM_NAME)
    }

    /// Instance profile of cluster instances.
    #[must_use]
    pub fn instance_profile(&self, cluster: &str) -> String {
        truncate(
            &format!("{}_{cluster}_instance_profile", self.prefix),
            MAX_IAM_NAME,
        )
    }

    /// Security group of cluster instances.
    #[must_use]
    pub fn instance_security_group(&self, cluster: &str) -> String {
        truncate(
            &format!("{}_{cluster}_instance_sg", self.prefix),
            MAX_GENERIC_NAME,
        )
    }

    /// Role the scheduler uses to register tasks with load balancers.
    #[must_use]
    pub fn service_role(&self, cluster: &str) -> String {
        truncate(
            &format!("{}_{cluster}_ecs_service_role", self.prefix),
            MAX_IAM_NAME,
        )
    }

    /// Image repository name.
    #[must_use]
    pub fn repository(&self, app: &str) -> String {
        format!("{}/{app}", self.prefix)
    }

    /// Task definition family.
    #[must_use]
    pub fn task_family(&self, app: &str) -> String {
        app.to_string()
    }

    /// Scheduler service name.
    #[must_use]
    pub fn service(&self, app: &str) -> String {
        app.to_string()
    }

    /// Load balancer name.
    ///
    /// The name is cut to 32 characters, which drops the `-lb` suffix of
    /// long application names. Two applications whose derived names share
    /// their first 32 characters therefore map to the same load balancer
    /// and, through [`Self::target_group`], the same target group. Keep
    /// application names short enough to stay distinct.
    #[must_use]
    pub fn load_balancer(&self, app: &str) -> String {
        truncate(
            &sanitize(&format!("{}-{app}-lb", self.prefix)),
            MAX_LOAD_BALANCER_NAME,
        )
    }

    /// Target group name.
    ///
    /// Truncated like [`Self::load_balancer`] and subject to the same
    /// collision between long application names.
    #[must_use]
    pub fn target_group(&self, app: &str) -> String {
        truncate(
            &sanitize(&format!("{}-{app}-tg", self.prefix)),
            MAX_LOAD_BALANCER_NAME,
        )
    }

    /// Security group of an application's load balancer.
    #[must_use]
    pub fn load_balancer_security_group(&self, app: &str) -> String {
        truncate(&format!("{}_{app}_lb_sg", self.prefix), MAX_GENERIC_NAME)
    }
}

/// Replaces characters load balancer names do not allow with `-`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Keeps the first `max` characters and drops trailing dashes.
fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max).collect();
    kept.trim_end_matches('-').to_string()
}

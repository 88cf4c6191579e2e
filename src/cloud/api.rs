//! Collaborator interfaces for the cloud provider.
//!
//! Each trait covers the resource kinds owned by one provider service.
//! Probes return `Ok(None)` when a resource is absent; absence is never
//! an error. Every call may fail with a [`ProviderError`] carrying a
//! machine-readable code.

use async_trait::async_trait;

use crate::error::ProviderError;

use super::types::{
    AutoScalingGroup, AutoScalingGroupParams, Cluster, HealthCheckParams, IngressRule,
    InstanceProfile, LaunchConfiguration, LaunchConfigurationParams, Listener, ListenerParams,
    LoadBalancer, LoadBalancerParams, RegistryCredentials, Repository, Role, SecurityGroup,
    SecurityGroupParams, Service, ServiceParams, ServiceUpdate, Tags, TargetGroup,
    TargetGroupParams, TaskDefinition, TaskDefinitionParams,
};

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Roles and instance profiles.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Describes a role.
    async fn get_role(&self, name: &str) -> ProviderResult<Option<Role>>;

    /// Creates a role with the given trust policy.
    async fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<Role>;

    /// Attaches a managed policy to a role.
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()>;

    /// Detaches a managed policy from a role.
    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()>;

    /// Deletes a role.
    async fn delete_role(&self, name: &str) -> ProviderResult<()>;

    /// Describes an instance profile.
    async fn get_instance_profile(&self, name: &str) -> ProviderResult<Option<InstanceProfile>>;

    /// Creates an instance profile.
    async fn create_instance_profile(&self, name: &str) -> ProviderResult<InstanceProfile>;

    /// Binds a role to an instance profile.
    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> ProviderResult<()>;

    /// Unbinds a role from an instance profile.
    async fn remove_role_from_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> ProviderResult<()>;

    /// Deletes an instance profile.
    async fn delete_instance_profile(&self, name: &str) -> ProviderResult<()>;
}

/// Networks, subnets and security groups.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Returns the id of the account's default network.
    async fn default_network(&self) -> ProviderResult<String>;

    /// Lists the subnet ids of a network.
    async fn list_subnets(&self, network_id: &str) -> ProviderResult<Vec<String>>;

    /// Describes a security group by id.
    async fn get_security_group(&self, id: &str) -> ProviderResult<Option<SecurityGroup>>;

    /// Describes a security group by name.
    async fn find_security_group(&self, name: &str) -> ProviderResult<Option<SecurityGroup>>;

    /// Creates a security group.
    async fn create_security_group(
        &self,
        params: &SecurityGroupParams,
    ) -> ProviderResult<SecurityGroup>;

    /// Adds an inbound rule.
    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()>;

    /// Removes an inbound rule.
    async fn revoke_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()>;

    /// Adds tags to a security group.
    async fn tag_security_group(&self, group_id: &str, tags: &Tags) -> ProviderResult<()>;

    /// Deletes a security group.
    async fn delete_security_group(&self, group_id: &str) -> ProviderResult<()>;
}

/// Launch configurations and autoscaling groups.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Describes a launch configuration.
    async fn get_launch_configuration(
        &self,
        name: &str,
    ) -> ProviderResult<Option<LaunchConfiguration>>;

    /// Creates a launch configuration.
    async fn create_launch_configuration(
        &self,
        params: &LaunchConfigurationParams,
    ) -> ProviderResult<LaunchConfiguration>;

    /// Deletes a launch configuration.
    async fn delete_launch_configuration(&self, name: &str) -> ProviderResult<()>;

    /// Describes an autoscaling group.
    async fn get_auto_scaling_group(&self, name: &str) -> ProviderResult<Option<AutoScalingGroup>>;

    /// Creates an autoscaling group.
    async fn create_auto_scaling_group(
        &self,
        params: &AutoScalingGroupParams,
    ) -> ProviderResult<AutoScalingGroup>;

    /// Changes the capacity bounds of an autoscaling group.
    async fn update_capacity(&self, name: &str, desired: u32, min: u32, max: u32)
    -> ProviderResult<()>;

    /// Adds tags to an autoscaling group.
    async fn tag_auto_scaling_group(&self, name: &str, tags: &Tags) -> ProviderResult<()>;

    /// Deletes an autoscaling group.
    async fn delete_auto_scaling_group(&self, name: &str) -> ProviderResult<()>;
}

/// Scheduler clusters, task definitions and services.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Describes a cluster.
    async fn get_cluster(&self, name: &str) -> ProviderResult<Option<Cluster>>;

    /// Creates a cluster.
    async fn create_cluster(&self, name: &str) -> ProviderResult<Cluster>;

    /// Deletes a cluster.
    async fn delete_cluster(&self, name: &str) -> ProviderResult<()>;

    /// Registers a new task definition revision.
    async fn register_task_definition(
        &self,
        params: &TaskDefinitionParams,
    ) -> ProviderResult<TaskDefinition>;

    /// Describes a service.
    async fn get_service(&self, cluster: &str, name: &str) -> ProviderResult<Option<Service>>;

    /// Creates a service.
    async fn create_service(&self, params: &ServiceParams) -> ProviderResult<Service>;

    /// Updates a service in place.
    async fn update_service(
        &self,
        cluster: &str,
        name: &str,
        update: &ServiceUpdate,
    ) -> ProviderResult<Service>;

    /// Deletes a service.
    async fn delete_service(&self, cluster: &str, name: &str) -> ProviderResult<()>;
}

/// Load balancers, target groups and listeners.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Describes a load balancer by name.
    async fn get_load_balancer(&self, name: &str) -> ProviderResult<Option<LoadBalancer>>;

    /// Creates a load balancer.
    async fn create_load_balancer(&self, params: &LoadBalancerParams)
    -> ProviderResult<LoadBalancer>;

    /// Adds tags to a load balancer.
    async fn tag_load_balancer(&self, arn: &str, tags: &Tags) -> ProviderResult<()>;

    /// Deletes a load balancer.
    async fn delete_load_balancer(&self, arn: &str) -> ProviderResult<()>;

    /// Describes a target group by name.
    async fn get_target_group(&self, name: &str) -> ProviderResult<Option<TargetGroup>>;

    /// Creates a target group.
    async fn create_target_group(&self, params: &TargetGroupParams) -> ProviderResult<TargetGroup>;

    /// Replaces the health check of a target group.
    async fn modify_health_check(
        &self,
        arn: &str,
        health_check: &HealthCheckParams,
    ) -> ProviderResult<()>;

    /// Deletes a target group.
    async fn delete_target_group(&self, arn: &str) -> ProviderResult<()>;

    /// Lists listeners of a load balancer.
    async fn list_listeners(&self, load_balancer_arn: &str) -> ProviderResult<Vec<Listener>>;

    /// Creates a listener.
    async fn create_listener(&self, params: &ListenerParams) -> ProviderResult<Listener>;

    /// Deletes a listener.
    async fn delete_listener(&self, arn: &str) -> ProviderResult<()>;
}

/// Image repositories.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Describes a repository.
    async fn get_repository(&self, name: &str) -> ProviderResult<Option<Repository>>;

    /// Creates a repository.
    async fn create_repository(&self, name: &str) -> ProviderResult<Repository>;

    /// Deletes a repository and its images.
    async fn delete_repository(&self, name: &str) -> ProviderResult<()>;
}

/// Container image build and push.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Logs in to a registry.
    async fn registry_login(&self, registry: &str) -> ProviderResult<RegistryCredentials>;

    /// Builds the image at `path` and tags it as `image`.
    async fn build_and_tag(&self, path: &str, image: &str) -> ProviderResult<String>;

    /// Pushes an image reference.
    async fn push(&self, image: &str) -> ProviderResult<()>;
}

//! In-memory simulated cloud.
//!
//! `MemoryCloud` implements every provider trait against a plain data
//! model. It behaves like the real provider where the reconciliation
//! engine depends on it: deletions fail while dependents exist, autoscaling
//! groups and services drain over several polls, and scale-down is
//! required before a service can be deleted. Every call is journaled in
//! order and faults can be injected per operation, which makes it the test
//! double for the reconcilers as well as the backend of the CLI sandbox.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;
use uuid::Uuid;

use crate::error::{codes, ProviderError};

use super::api::{
    ComputeApi, IdentityApi, ImageBuilder, LoadBalancerApi, NetworkApi, ProviderResult,
    RegistryApi, SchedulerApi,
};
use super::types::{
    AutoScalingGroup, AutoScalingGroupParams, Cluster, HealthCheckParams, IngressRule,
    IngressSource, InstanceProfile, LaunchConfiguration, LaunchConfigurationParams, Listener,
    ListenerParams, LoadBalancer, LoadBalancerParams, RegistryCredentials, Repository, Role,
    SecurityGroup, SecurityGroupParams, Service, ServiceParams, ServiceUpdate, Tags, TargetGroup,
    TargetGroupParams, TaskDefinition, TaskDefinitionParams, GROUP_DELETING, STATUS_ACTIVE,
    STATUS_DRAINING, STATUS_INACTIVE,
};

/// Network created for a fresh sandbox.
pub const DEFAULT_NETWORK: &str = "vpc-sandbox";

/// Everything the simulated cloud knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxState {
    /// Account id used in ARNs.
    pub account: String,
    /// Region used in ARNs.
    pub region: String,
    /// Default network id.
    pub default_network: String,
    /// Networks and their subnets.
    pub networks: BTreeMap<String, Vec<String>>,
    /// Roles by name.
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
    /// Instance profiles by name.
    #[serde(default)]
    pub instance_profiles: BTreeMap<String, InstanceProfile>,
    /// Security groups by id.
    #[serde(default)]
    pub security_groups: BTreeMap<String, SecurityGroup>,
    /// Launch configurations by name.
    #[serde(default)]
    pub launch_configurations: BTreeMap<String, LaunchConfiguration>,
    /// Autoscaling groups by name.
    #[serde(default)]
    pub auto_scaling_groups: BTreeMap<String, AutoScalingGroup>,
    /// Scheduler clusters by name.
    #[serde(default)]
    pub clusters: BTreeMap<String, Cluster>,
    /// Task definition revisions by family.
    #[serde(default)]
    pub task_definitions: BTreeMap<String, Vec<TaskDefinition>>,
    /// Services keyed by `cluster/name`.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Repositories by name.
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
    /// Load balancers by name.
    #[serde(default)]
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    /// Target groups by name.
    #[serde(default)]
    pub target_groups: BTreeMap<String, TargetGroup>,
    /// Listeners by ARN.
    #[serde(default)]
    pub listeners: BTreeMap<String, Listener>,
    /// Remaining polls before an in-flight scale or delete settles.
    #[serde(default)]
    pub pending: BTreeMap<String, u32>,
}

impl Default for SandboxState {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            DEFAULT_NETWORK.to_string(),
            vec![
                String::from("subnet-sandbox-a"),
                String::from("subnet-sandbox-b"),
                String::from("subnet-sandbox-c"),
            ],
        );

        Self {
            account: String::from("000000000000"),
            region: String::from("sandbox-1"),
            default_network: DEFAULT_NETWORK.to_string(),
            networks,
            roles: BTreeMap::new(),
            instance_profiles: BTreeMap::new(),
            security_groups: BTreeMap::new(),
            launch_configurations: BTreeMap::new(),
            auto_scaling_groups: BTreeMap::new(),
            clusters: BTreeMap::new(),
            task_definitions: BTreeMap::new(),
            services: BTreeMap::new(),
            repositories: BTreeMap::new(),
            load_balancers: BTreeMap::new(),
            target_groups: BTreeMap::new(),
            listeners: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }
}

impl SandboxState {
    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:sandbox:{service}:{}:{}:{resource}", self.region, self.account)
    }
}

/// How slowly asynchronous operations settle, in polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxSettings {
    /// Polls an autoscaling group reports its old instance count after a capacity change.
    pub instance_drain_polls: u32,
    /// Polls a service reports its old running count after a count change or delete.
    pub service_drain_polls: u32,
    /// Polls a deleted autoscaling group stays visible as "deleting".
    pub group_delete_polls: u32,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            instance_drain_polls: 1,
            service_drain_polls: 1,
            group_delete_polls: 1,
        }
    }
}

/// A journaled provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCall {
    /// Operation name, e.g. `create_role`.
    pub operation: String,
    /// Resource name or id the call addressed.
    pub target: String,
}

impl std::fmt::Display for CloudCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.operation, self.target)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    operation: String,
    code: String,
    remaining: Option<u32>,
}

/// In-memory implementation of every provider trait.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    state: Mutex<SandboxState>,
    journal: Mutex<Vec<CloudCall>>,
    faults: Mutex<Vec<Fault>>,
    settings: SandboxSettings,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(12).collect()
}

fn not_found(what: &str, name: &str) -> ProviderError {
    ProviderError::not_found(format!("{what} {name} does not exist"))
}

fn already_exists(what: &str, name: &str) -> ProviderError {
    ProviderError::new(codes::ALREADY_EXISTS, format!("{what} {name} already exists"))
}

fn service_key(cluster: &str, name: &str) -> String {
    format!("{cluster}/{name}")
}

impl MemoryCloud {
    /// Creates an empty sandbox with a default network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sandbox from a previously saved state.
    #[must_use]
    pub fn from_state(state: SandboxState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Sets drain and deletion speeds.
    #[must_use]
    pub const fn with_settings(mut self, settings: SandboxSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SandboxState {
        lock(&self.state).clone()
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.journal).clone()
    }

    /// Returns the operation names of every call made so far.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        lock(&self.journal)
            .iter()
            .map(|c| c.operation.clone())
            .collect()
    }

    /// Returns the calls that created or registered a resource.
    #[must_use]
    pub fn creations(&self) -> Vec<CloudCall> {
        lock(&self.journal)
            .iter()
            .filter(|c| c.operation.starts_with("create_") || c.operation.starts_with("register_"))
            .cloned()
            .collect()
    }

    /// Counts the calls of one operation.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.journal)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Forgets the journal.
    pub fn clear_calls(&self) {
        lock(&self.journal).clear();
    }

    /// Makes `operation` fail with `code`, `times` times or forever when `None`.
    pub fn inject_fault(&self, operation: &str, code: &str, times: Option<u32>) {
        lock(&self.faults).push(Fault {
            operation: operation.to_string(),
            code: code.to_string(),
            remaining: times,
        });
    }

    /// Journals a call, applies injected faults and hands out the state.
    fn call(&self, operation: &str, target: &str) -> ProviderResult<MutexGuard<'_, SandboxState>> {
        trace!("sandbox call: {operation} {target}");
        lock(&self.journal).push(CloudCall {
            operation: operation.to_string(),
            target: target.to_string(),
        });

        let mut faults = lock(&self.faults);
        if let Some(index) = faults.iter().position(|f| f.operation == operation) {
            let code = faults[index].code.clone();
            match faults[index].remaining {
                Some(1) => {
                    faults.remove(index);
                }
                Some(n) => faults[index].remaining = Some(n.saturating_sub(1)),
                None => {}
            }
            return Err(ProviderError::new(
                code,
                format!("injected failure of {operation} on {target}"),
            ));
        }
        drop(faults);

        Ok(lock(&self.state))
    }

    /// Advances an in-flight change by one poll; returns true once it has settled.
    fn settle(state: &mut SandboxState, key: &str) -> bool {
        match state.pending.get(key).copied() {
            Some(n) if n > 0 => {
                state.pending.insert(key.to_string(), n - 1);
                false
            }
            _ => {
                state.pending.remove(key);
                true
            }
        }
    }

    fn parse_repository(image: &str) -> Option<&str> {
        let (_, path) = image.split_once('/')?;
        Some(path.split(':').next().unwrap_or(path))
    }
}

#[async_trait]
impl IdentityApi for MemoryCloud {
    async fn get_role(&self, name: &str) -> ProviderResult<Option<Role>> {
        let state = self.call("get_role", name)?;
        Ok(state.roles.get(name).cloned())
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<Role> {
        let mut state = self.call("create_role", name)?;
        if state.roles.contains_key(name) {
            return Err(already_exists("role", name));
        }
        let role = Role {
            name: name.to_string(),
            arn: state.arn("iam", &format!("role/{name}")),
            trust_policy: trust_policy.to_string(),
            attached_policies: vec![],
        };
        state.roles.insert(name.to_string(), role.clone());
        Ok(role)
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        let mut state = self.call("attach_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found("role", role))?;
        if !entry.attached_policies.iter().any(|p| p == policy_arn) {
            entry.attached_policies.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        let mut state = self.call("detach_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found("role", role))?;
        entry.attached_policies.retain(|p| p != policy_arn);
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_role", name)?;
        let role = state.roles.get(name).ok_or_else(|| not_found("role", name))?;
        if !role.attached_policies.is_empty() {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("role {name} still has attached policies"),
            ));
        }
        if state
            .instance_profiles
            .values()
            .any(|p| p.roles.iter().any(|r| r == name))
        {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("role {name} is still bound to an instance profile"),
            ));
        }
        state.roles.remove(name);
        Ok(())
    }

    async fn get_instance_profile(&self, name: &str) -> ProviderResult<Option<InstanceProfile>> {
        let state = self.call("get_instance_profile", name)?;
        Ok(state.instance_profiles.get(name).cloned())
    }

    async fn create_instance_profile(&self, name: &str) -> ProviderResult<InstanceProfile> {
        let mut state = self.call("create_instance_profile", name)?;
        if state.instance_profiles.contains_key(name) {
            return Err(already_exists("instance profile", name));
        }
        let profile = InstanceProfile {
            name: name.to_string(),
            arn: state.arn("iam", &format!("instance-profile/{name}")),
            roles: vec![],
        };
        state.instance_profiles.insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> ProviderResult<()> {
        let mut state = self.call("add_role_to_instance_profile", profile)?;
        if !state.roles.contains_key(role) {
            return Err(not_found("role", role));
        }
        let entry = state
            .instance_profiles
            .get_mut(profile)
            .ok_or_else(|| not_found("instance profile", profile))?;
        if !entry.roles.iter().any(|r| r == role) {
            entry.roles.push(role.to_string());
        }
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> ProviderResult<()> {
        let mut state = self.call("remove_role_from_instance_profile", profile)?;
        let entry = state
            .instance_profiles
            .get_mut(profile)
            .ok_or_else(|| not_found("instance profile", profile))?;
        entry.roles.retain(|r| r != role);
        Ok(())
    }

    async fn delete_instance_profile(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_instance_profile", name)?;
        let profile = state
            .instance_profiles
            .get(name)
            .ok_or_else(|| not_found("instance profile", name))?;
        if !profile.roles.is_empty() {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("instance profile {name} still has roles"),
            ));
        }
        state.instance_profiles.remove(name);
        Ok(())
    }
}

#[async_trait]
impl NetworkApi for MemoryCloud {
    async fn default_network(&self) -> ProviderResult<String> {
        let state = self.call("default_network", "")?;
        Ok(state.default_network.clone())
    }

    async fn list_subnets(&self, network_id: &str) -> ProviderResult<Vec<String>> {
        let state = self.call("list_subnets", network_id)?;
        state
            .networks
            .get(network_id)
            .cloned()
            .ok_or_else(|| not_found("network", network_id))
    }

    async fn get_security_group(&self, id: &str) -> ProviderResult<Option<SecurityGroup>> {
        let state = self.call("get_security_group", id)?;
        Ok(state.security_groups.get(id).cloned())
    }

    async fn find_security_group(&self, name: &str) -> ProviderResult<Option<SecurityGroup>> {
        let state = self.call("find_security_group", name)?;
        Ok(state
            .security_groups
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn create_security_group(
        &self,
        params: &SecurityGroupParams,
    ) -> ProviderResult<SecurityGroup> {
        let mut state = self.call("create_security_group", &params.name)?;
        if !state.networks.contains_key(&params.network_id) {
            return Err(not_found("network", &params.network_id));
        }
        if state
            .security_groups
            .values()
            .any(|g| g.name == params.name && g.network_id == params.network_id)
        {
            return Err(already_exists("security group", &params.name));
        }
        let group = SecurityGroup {
            id: format!("sg-{}", short_id()),
            name: params.name.clone(),
            network_id: params.network_id.clone(),
            description: params.description.clone(),
            ingress: vec![],
            tags: Tags::new(),
        };
        state.security_groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()> {
        let mut state = self.call("authorize_ingress", group_id)?;
        if let IngressSource::Group(source) = &rule.source {
            if !state.security_groups.contains_key(source) {
                return Err(not_found("security group", source));
            }
        }
        let group = state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("security group", group_id))?;
        if group.ingress.contains(rule) {
            return Err(already_exists("ingress rule on", group_id));
        }
        group.ingress.push(rule.clone());
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()> {
        let mut state = self.call("revoke_ingress", group_id)?;
        let group = state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("security group", group_id))?;
        let before = group.ingress.len();
        group.ingress.retain(|r| r != rule);
        if group.ingress.len() == before {
            return Err(not_found("ingress rule on", group_id));
        }
        Ok(())
    }

    async fn tag_security_group(&self, group_id: &str, tags: &Tags) -> ProviderResult<()> {
        let mut state = self.call("tag_security_group", group_id)?;
        let group = state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("security group", group_id))?;
        group.tags.extend(tags.clone());
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_security_group", group_id)?;
        if !state.security_groups.contains_key(group_id) {
            return Err(not_found("security group", group_id));
        }
        let referenced = state
            .security_groups
            .values()
            .any(|g| g.id != group_id && g.allows_group(group_id));
        let attached = state
            .load_balancers
            .values()
            .any(|lb| lb.security_groups.iter().any(|g| g == group_id));
        let running = state.auto_scaling_groups.values().any(|asg| {
            asg.instance_count > 0
                && state
                    .launch_configurations
                    .get(&asg.launch_configuration)
                    .is_some_and(|lc| lc.security_groups.iter().any(|g| g == group_id))
        });
        if referenced || attached || running {
            return Err(ProviderError::new(
                codes::DEPENDENCY_VIOLATION,
                format!("security group {group_id} has a dependent object"),
            ));
        }
        state.security_groups.remove(group_id);
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for MemoryCloud {
    async fn get_launch_configuration(
        &self,
        name: &str,
    ) -> ProviderResult<Option<LaunchConfiguration>> {
        let state = self.call("get_launch_configuration", name)?;
        Ok(state.launch_configurations.get(name).cloned())
    }

    async fn create_launch_configuration(
        &self,
        params: &LaunchConfigurationParams,
    ) -> ProviderResult<LaunchConfiguration> {
        let mut state = self.call("create_launch_configuration", &params.name)?;
        if state.launch_configurations.contains_key(&params.name) {
            return Err(already_exists("launch configuration", &params.name));
        }
        if !state.instance_profiles.contains_key(&params.instance_profile) {
            return Err(ProviderError::new(
                codes::INVALID_INSTANCE_PROFILE,
                format!("invalid instance profile {}", params.instance_profile),
            ));
        }
        state
            .launch_configurations
            .insert(params.name.clone(), params.clone());
        Ok(params.clone())
    }

    async fn delete_launch_configuration(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_launch_configuration", name)?;
        if !state.launch_configurations.contains_key(name) {
            return Err(not_found("launch configuration", name));
        }
        if state
            .auto_scaling_groups
            .values()
            .any(|g| g.launch_configuration == name)
        {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("launch configuration {name} is attached to a group"),
            ));
        }
        state.launch_configurations.remove(name);
        Ok(())
    }

    async fn get_auto_scaling_group(&self, name: &str) -> ProviderResult<Option<AutoScalingGroup>> {
        let mut guard = self.call("get_auto_scaling_group", name)?;
        let state = &mut *guard;
        let key = format!("asg:{name}");

        let Some(group) = state.auto_scaling_groups.get(name) else {
            return Ok(None);
        };
        let settling = group.is_deleting() || group.instance_count != group.desired;
        if settling && Self::settle(state, &key) {
            let deleting = state
                .auto_scaling_groups
                .get(name)
                .is_some_and(AutoScalingGroup::is_deleting);
            if deleting {
                state.auto_scaling_groups.remove(name);
                return Ok(None);
            }
            if let Some(group) = state.auto_scaling_groups.get_mut(name) {
                group.instance_count = group.desired;
            }
        }
        Ok(state.auto_scaling_groups.get(name).cloned())
    }

    async fn create_auto_scaling_group(
        &self,
        params: &AutoScalingGroupParams,
    ) -> ProviderResult<AutoScalingGroup> {
        let mut state = self.call("create_auto_scaling_group", &params.name)?;
        if state.auto_scaling_groups.contains_key(&params.name) {
            return Err(already_exists("autoscaling group", &params.name));
        }
        if !state
            .launch_configurations
            .contains_key(&params.launch_configuration)
        {
            return Err(not_found("launch configuration", &params.launch_configuration));
        }
        if params.subnets.is_empty() {
            return Err(ProviderError::new(codes::VALIDATION, "no subnets given"));
        }
        let group = AutoScalingGroup {
            name: params.name.clone(),
            arn: state.arn("autoscaling", &format!("autoScalingGroup/{}", params.name)),
            launch_configuration: params.launch_configuration.clone(),
            desired: params.desired,
            min: params.min,
            max: params.max,
            instance_count: params.desired,
            status: None,
            subnets: params.subnets.clone(),
            tags: Tags::new(),
        };
        state
            .auto_scaling_groups
            .insert(params.name.clone(), group.clone());
        Ok(group)
    }

    async fn update_capacity(
        &self,
        name: &str,
        desired: u32,
        min: u32,
        max: u32,
    ) -> ProviderResult<()> {
        let mut state = self.call("update_capacity", name)?;
        let group = state
            .auto_scaling_groups
            .get_mut(name)
            .ok_or_else(|| not_found("autoscaling group", name))?;
        group.desired = desired;
        group.min = min;
        group.max = max;
        let settled = group.instance_count == desired;
        if !settled {
            state
                .pending
                .insert(format!("asg:{name}"), self.settings.instance_drain_polls);
        }
        Ok(())
    }

    async fn tag_auto_scaling_group(&self, name: &str, tags: &Tags) -> ProviderResult<()> {
        let mut state = self.call("tag_auto_scaling_group", name)?;
        let group = state
            .auto_scaling_groups
            .get_mut(name)
            .ok_or_else(|| not_found("autoscaling group", name))?;
        group.tags.extend(tags.clone());
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_auto_scaling_group", name)?;
        let group = state
            .auto_scaling_groups
            .get_mut(name)
            .ok_or_else(|| not_found("autoscaling group", name))?;
        if group.instance_count > 0 {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("autoscaling group {name} still has instances"),
            ));
        }
        if self.settings.group_delete_polls == 0 {
            state.auto_scaling_groups.remove(name);
        } else {
            group.status = Some(GROUP_DELETING.to_string());
            state
                .pending
                .insert(format!("asg:{name}"), self.settings.group_delete_polls);
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulerApi for MemoryCloud {
    async fn get_cluster(&self, name: &str) -> ProviderResult<Option<Cluster>> {
        let state = self.call("get_cluster", name)?;
        Ok(state.clusters.get(name).cloned())
    }

    async fn create_cluster(&self, name: &str) -> ProviderResult<Cluster> {
        let mut state = self.call("create_cluster", name)?;
        let arn = state.arn("ecs", &format!("cluster/{name}"));
        let cluster = state
            .clusters
            .entry(name.to_string())
            .or_insert_with(|| Cluster {
                name: name.to_string(),
                arn,
                status: STATUS_ACTIVE.to_string(),
            });
        cluster.status = STATUS_ACTIVE.to_string();
        Ok(cluster.clone())
    }

    async fn delete_cluster(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_cluster", name)?;
        if !state.clusters.get(name).is_some_and(Cluster::is_active) {
            return Err(not_found("cluster", name));
        }
        if state
            .services
            .values()
            .any(|s| s.cluster == name && s.status != STATUS_INACTIVE)
        {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("cluster {name} still has services"),
            ));
        }
        if let Some(cluster) = state.clusters.get_mut(name) {
            cluster.status = STATUS_INACTIVE.to_string();
        }
        Ok(())
    }

    async fn register_task_definition(
        &self,
        params: &TaskDefinitionParams,
    ) -> ProviderResult<TaskDefinition> {
        let mut state = self.call("register_task_definition", &params.family)?;
        let revision = state
            .task_definitions
            .get(&params.family)
            .and_then(|revisions| revisions.last())
            .map_or(1, |last| last.revision + 1);
        let definition = TaskDefinition {
            family: params.family.clone(),
            revision,
            arn: state.arn("ecs", &format!("task-definition/{}:{revision}", params.family)),
            container: params.container.clone(),
        };
        state
            .task_definitions
            .entry(params.family.clone())
            .or_default()
            .push(definition.clone());
        Ok(definition)
    }

    async fn get_service(&self, cluster: &str, name: &str) -> ProviderResult<Option<Service>> {
        let key = service_key(cluster, name);
        let mut guard = self.call("get_service", &key)?;
        let state = &mut *guard;
        let pending_key = format!("svc:{key}");

        let Some(service) = state.services.get(&key) else {
            return Ok(None);
        };
        let settling = service.is_draining() || service.running_count != service.desired_count;
        if settling && Self::settle(state, &pending_key) {
            if let Some(service) = state.services.get_mut(&key) {
                service.running_count = service.desired_count;
                if service.is_draining() {
                    service.status = STATUS_INACTIVE.to_string();
                }
            }
        }
        Ok(state.services.get(&key).cloned())
    }

    async fn create_service(&self, params: &ServiceParams) -> ProviderResult<Service> {
        let key = service_key(&params.cluster, &params.name);
        let mut state = self.call("create_service", &key)?;
        if !state.clusters.get(&params.cluster).is_some_and(Cluster::is_active) {
            return Err(not_found("cluster", &params.cluster));
        }
        if state
            .services
            .get(&key)
            .is_some_and(|s| s.status != STATUS_INACTIVE)
        {
            return Err(already_exists("service", &params.name));
        }
        let known_definition = state
            .task_definitions
            .values()
            .flatten()
            .any(|d| d.arn == params.task_definition);
        if !known_definition {
            return Err(ProviderError::new(
                codes::VALIDATION,
                format!("unknown task definition {}", params.task_definition),
            ));
        }
        if let Some(binding) = &params.load_balancer {
            if !state
                .target_groups
                .values()
                .any(|t| t.arn == binding.target_group_arn)
            {
                return Err(not_found("target group", &binding.target_group_arn));
            }
        }
        let service = Service {
            name: params.name.clone(),
            arn: state.arn("ecs", &format!("service/{}/{}", params.cluster, params.name)),
            cluster: params.cluster.clone(),
            status: STATUS_ACTIVE.to_string(),
            task_definition: params.task_definition.clone(),
            desired_count: params.desired_count,
            running_count: params.desired_count,
            load_balancers: params.load_balancer.iter().cloned().collect(),
            role: params.role.clone(),
            deployment: params.deployment,
        };
        state.services.insert(key, service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        cluster: &str,
        name: &str,
        update: &ServiceUpdate,
    ) -> ProviderResult<Service> {
        let key = service_key(cluster, name);
        let mut state = self.call("update_service", &key)?;
        let drain_polls = self.settings.service_drain_polls;
        let service = state
            .services
            .get_mut(&key)
            .filter(|s| s.is_active())
            .ok_or_else(|| not_found("service", name))?;
        if let Some(task_definition) = &update.task_definition {
            service.task_definition.clone_from(task_definition);
        }
        if let Some(count) = update.desired_count {
            service.desired_count = count;
        }
        let updated = service.clone();
        if updated.running_count != updated.desired_count {
            state.pending.insert(format!("svc:{key}"), drain_polls);
        }
        Ok(updated)
    }

    async fn delete_service(&self, cluster: &str, name: &str) -> ProviderResult<()> {
        let key = service_key(cluster, name);
        let mut state = self.call("delete_service", &key)?;
        let drain_polls = self.settings.service_drain_polls;
        let service = state
            .services
            .get_mut(&key)
            .filter(|s| s.status != STATUS_INACTIVE)
            .ok_or_else(|| not_found("service", name))?;
        if service.desired_count > 0 {
            return Err(ProviderError::new(
                codes::VALIDATION,
                format!("service {name} cannot be deleted while scaled above 0"),
            ));
        }
        service.status = STATUS_DRAINING.to_string();
        state.pending.insert(format!("svc:{key}"), drain_polls);
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerApi for MemoryCloud {
    async fn get_load_balancer(&self, name: &str) -> ProviderResult<Option<LoadBalancer>> {
        let state = self.call("get_load_balancer", name)?;
        Ok(state.load_balancers.get(name).cloned())
    }

    async fn create_load_balancer(
        &self,
        params: &LoadBalancerParams,
    ) -> ProviderResult<LoadBalancer> {
        let mut state = self.call("create_load_balancer", &params.name)?;
        if state.load_balancers.contains_key(&params.name) {
            return Err(already_exists("load balancer", &params.name));
        }
        if params.subnets.is_empty() {
            return Err(ProviderError::new(codes::VALIDATION, "no subnets given"));
        }
        if let Some(missing) = params
            .security_groups
            .iter()
            .find(|g| !state.security_groups.contains_key(*g))
        {
            return Err(not_found("security group", missing));
        }
        let id = short_id();
        let load_balancer = LoadBalancer {
            name: params.name.clone(),
            arn: state.arn("elb", &format!("loadbalancer/app/{}/{id}", params.name)),
            dns_name: format!("{}-{id}.{}.elb.sandbox.local", params.name, state.region),
            security_groups: params.security_groups.clone(),
            subnets: params.subnets.clone(),
            tags: Tags::new(),
        };
        state
            .load_balancers
            .insert(params.name.clone(), load_balancer.clone());
        Ok(load_balancer)
    }

    async fn tag_load_balancer(&self, arn: &str, tags: &Tags) -> ProviderResult<()> {
        let mut state = self.call("tag_load_balancer", arn)?;
        let load_balancer = state
            .load_balancers
            .values_mut()
            .find(|lb| lb.arn == arn)
            .ok_or_else(|| not_found("load balancer", arn))?;
        load_balancer.tags.extend(tags.clone());
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_load_balancer", arn)?;
        let name = state
            .load_balancers
            .values()
            .find(|lb| lb.arn == arn)
            .map(|lb| lb.name.clone())
            .ok_or_else(|| not_found("load balancer", arn))?;
        state.load_balancers.remove(&name);
        state.listeners.retain(|_, l| l.load_balancer_arn != arn);
        Ok(())
    }

    async fn get_target_group(&self, name: &str) -> ProviderResult<Option<TargetGroup>> {
        let state = self.call("get_target_group", name)?;
        Ok(state.target_groups.get(name).cloned())
    }

    async fn create_target_group(&self, params: &TargetGroupParams) -> ProviderResult<TargetGroup> {
        let mut state = self.call("create_target_group", &params.name)?;
        if state.target_groups.contains_key(&params.name) {
            return Err(already_exists("target group", &params.name));
        }
        let target_group = TargetGroup {
            name: params.name.clone(),
            arn: state.arn("elb", &format!("targetgroup/{}/{}", params.name, short_id())),
            port: params.port,
            protocol: params.protocol.clone(),
            network_id: params.network_id.clone(),
            health_check: params.health_check.clone(),
        };
        state
            .target_groups
            .insert(params.name.clone(), target_group.clone());
        Ok(target_group)
    }

    async fn modify_health_check(
        &self,
        arn: &str,
        health_check: &HealthCheckParams,
    ) -> ProviderResult<()> {
        let mut state = self.call("modify_health_check", arn)?;
        let target_group = state
            .target_groups
            .values_mut()
            .find(|t| t.arn == arn)
            .ok_or_else(|| not_found("target group", arn))?;
        target_group.health_check = health_check.clone();
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_target_group", arn)?;
        if state.listeners.values().any(|l| l.target_group_arn == arn) {
            return Err(ProviderError::new(
                codes::RESOURCE_IN_USE,
                format!("target group {arn} is in use by a listener"),
            ));
        }
        let name = state
            .target_groups
            .values()
            .find(|t| t.arn == arn)
            .map(|t| t.name.clone())
            .ok_or_else(|| not_found("target group", arn))?;
        state.target_groups.remove(&name);
        Ok(())
    }

    async fn list_listeners(&self, load_balancer_arn: &str) -> ProviderResult<Vec<Listener>> {
        let state = self.call("list_listeners", load_balancer_arn)?;
        if !state
            .load_balancers
            .values()
            .any(|lb| lb.arn == load_balancer_arn)
        {
            return Err(not_found("load balancer", load_balancer_arn));
        }
        Ok(state
            .listeners
            .values()
            .filter(|l| l.load_balancer_arn == load_balancer_arn)
            .cloned()
            .collect())
    }

    async fn create_listener(&self, params: &ListenerParams) -> ProviderResult<Listener> {
        let mut state = self.call("create_listener", &params.load_balancer_arn)?;
        if !state
            .load_balancers
            .values()
            .any(|lb| lb.arn == params.load_balancer_arn)
        {
            return Err(not_found("load balancer", &params.load_balancer_arn));
        }
        if !state
            .target_groups
            .values()
            .any(|t| t.arn == params.target_group_arn)
        {
            return Err(not_found("target group", &params.target_group_arn));
        }
        if state
            .listeners
            .values()
            .any(|l| l.load_balancer_arn == params.load_balancer_arn && l.port == params.port)
        {
            return Err(already_exists("listener on port", &params.port.to_string()));
        }
        let listener = Listener {
            arn: format!("{}/listener/{}", params.load_balancer_arn, short_id()),
            load_balancer_arn: params.load_balancer_arn.clone(),
            port: params.port,
            protocol: params.protocol.clone(),
            certificate: params.certificate.clone(),
            target_group_arn: params.target_group_arn.clone(),
        };
        state.listeners.insert(listener.arn.clone(), listener.clone());
        Ok(listener)
    }

    async fn delete_listener(&self, arn: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_listener", arn)?;
        state
            .listeners
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| not_found("listener", arn))
    }
}

#[async_trait]
impl RegistryApi for MemoryCloud {
    async fn get_repository(&self, name: &str) -> ProviderResult<Option<Repository>> {
        let state = self.call("get_repository", name)?;
        Ok(state.repositories.get(name).cloned())
    }

    async fn create_repository(&self, name: &str) -> ProviderResult<Repository> {
        let mut state = self.call("create_repository", name)?;
        if state.repositories.contains_key(name) {
            return Err(already_exists("repository", name));
        }
        let repository = Repository {
            name: name.to_string(),
            arn: state.arn("ecr", &format!("repository/{name}")),
            uri: format!("{}.dkr.{}.sandbox.local/{name}", state.account, state.region),
        };
        state.repositories.insert(name.to_string(), repository.clone());
        Ok(repository)
    }

    async fn delete_repository(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.call("delete_repository", name)?;
        state
            .repositories
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("repository", name))
    }
}

#[async_trait]
impl ImageBuilder for MemoryCloud {
    async fn registry_login(&self, registry: &str) -> ProviderResult<RegistryCredentials> {
        let _state = self.call("registry_login", registry)?;
        Ok(RegistryCredentials {
            endpoint: registry.to_string(),
            username: String::from("AWS"),
            password: short_id(),
        })
    }

    async fn build_and_tag(&self, path: &str, image: &str) -> ProviderResult<String> {
        let _state = self.call("build_and_tag", path)?;
        Ok(image.to_string())
    }

    async fn push(&self, image: &str) -> ProviderResult<()> {
        let state = self.call("push", image)?;
        let repository = Self::parse_repository(image)
            .ok_or_else(|| ProviderError::new(codes::VALIDATION, format!("bad image {image}")))?;
        if !state.repositories.contains_key(repository) {
            return Err(not_found("repository", repository));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_params(name: &str, desired: u32) -> AutoScalingGroupParams {
        AutoScalingGroupParams {
            name: name.to_string(),
            launch_configuration: String::from("lc"),
            subnets: vec![String::from("subnet-sandbox-a")],
            desired,
            min: desired,
            max: desired,
        }
    }

    async fn seed_group(cloud: &MemoryCloud, desired: u32) {
        cloud.create_role("role", "{}").await.unwrap();
        cloud.create_instance_profile("profile").await.unwrap();
        cloud
            .create_launch_configuration(&LaunchConfiguration {
                name: String::from("lc"),
                instance_profile: String::from("profile"),
                instance_type: String::from("t2.micro"),
                image_id: String::from("ami-1"),
                key_pair: None,
                security_groups: vec![],
                user_data: String::new(),
            })
            .await
            .unwrap();
        cloud
            .create_auto_scaling_group(&group_params("asg", desired))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed() {
        let cloud = MemoryCloud::new();
        cloud.inject_fault("create_role", codes::THROTTLING, Some(1));

        let first = cloud.create_role("r", "{}").await;
        assert_eq!(first.unwrap_err().code, codes::THROTTLING);
        assert!(cloud.create_role("r", "{}").await.is_ok());
        assert_eq!(cloud.count("create_role"), 2);
    }

    #[tokio::test]
    async fn test_group_drains_after_configured_polls() {
        let cloud = MemoryCloud::new().with_settings(SandboxSettings {
            instance_drain_polls: 2,
            ..SandboxSettings::default()
        });
        seed_group(&cloud, 2).await;

        cloud.update_capacity("asg", 0, 0, 0).await.unwrap();
        let counts: Vec<u32> = {
            let mut counts = vec![];
            for _ in 0..3 {
                let group = cloud.get_auto_scaling_group("asg").await.unwrap().unwrap();
                counts.push(group.instance_count);
            }
            counts
        };

        assert_eq!(counts, vec![2, 2, 0]);
    }

    #[tokio::test]
    async fn test_group_delete_requires_zero_instances() {
        let cloud = MemoryCloud::new();
        seed_group(&cloud, 1).await;

        let err = cloud.delete_auto_scaling_group("asg").await.unwrap_err();
        assert_eq!(err.code, codes::RESOURCE_IN_USE);
    }

    #[tokio::test]
    async fn test_task_definition_revisions_increase() {
        let cloud = MemoryCloud::new();
        let params = TaskDefinitionParams {
            family: String::from("echo"),
            container: super::super::types::ContainerDefinition {
                name: String::from("echo"),
                image: String::from("echo:latest"),
                cpu: 512,
                memory_mib: 500,
                port_mappings: vec![],
                environment: BTreeMap::new(),
                log_configuration: None,
            },
        };

        let first = cloud.register_task_definition(&params).await.unwrap();
        let second = cloud.register_task_definition(&params).await.unwrap();

        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);
        assert!(second.arn.ends_with("echo:2"));
    }

    #[tokio::test]
    async fn test_security_group_in_use_by_load_balancer() {
        let cloud = MemoryCloud::new();
        let group = cloud
            .create_security_group(&SecurityGroupParams {
                name: String::from("lb-sg"),
                description: String::new(),
                network_id: DEFAULT_NETWORK.to_string(),
            })
            .await
            .unwrap();
        cloud
            .create_load_balancer(&LoadBalancerParams {
                name: String::from("lb"),
                subnets: vec![String::from("subnet-sandbox-a")],
                security_groups: vec![group.id.clone()],
            })
            .await
            .unwrap();

        let err = cloud.delete_security_group(&group.id).await.unwrap_err();
        assert_eq!(err.code, codes::DEPENDENCY_VIOLATION);
    }
}

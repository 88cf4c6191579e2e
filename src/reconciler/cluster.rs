//! Cluster reconciler.
//!
//! Brings a [`ClusterSpec`] into existence in strict dependency order:
//! instance role and profile, instance security group, launch
//! configuration, autoscaling group, scheduler cluster and finally the
//! scheduler service role. Each resource is probed first and only created
//! when missing. Any failure aborts the run.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::cloud::{
    AutoScalingGroupParams, IngressRule, IngressSource, LaunchConfigurationParams, ResourceKind,
    ResourceRef, SecurityGroupParams,
};
use crate::config::ConfigHasher;
use crate::error::{codes, ConfigError, ProviderResultExt, Result};
use crate::events::EventAction;
use crate::model::{ClusterSpec, ANYWHERE};
use crate::planner::{Action, ReconciliationPlan};
use crate::retry::{retry_on_codes, wait_until};
use crate::tagging::OwnershipTag;

use super::{existing_id, Context, ReconcileReport};

/// Trust policy letting compute instances assume the instance role.
pub const INSTANCE_TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

/// Trust policy letting the scheduler assume the service role.
pub const SERVICE_TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ecs.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

/// Policy attached to the instance role.
pub const INSTANCE_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AdministratorAccess";

/// Policy attached to the scheduler service role.
pub const SERVICE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceRole";

/// Port opened on the instance security group for management access.
pub const MANAGEMENT_PORT: u16 = 22;

/// Creates the compute and scheduler cluster topology.
#[derive(Debug)]
pub struct ClusterReconciler<'a> {
    ctx: &'a Context<'a>,
    spec: &'a ClusterSpec,
}

impl<'a> ClusterReconciler<'a> {
    /// Creates a reconciler for one cluster.
    #[must_use]
    pub const fn new(ctx: &'a Context<'a>, spec: &'a ClusterSpec) -> Self {
        Self { ctx, spec }
    }

    /// Probes and applies in one go.
    ///
    /// # Errors
    ///
    /// Returns the first probe, provider or retry error.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let plan = self.plan().await?;
        self.apply(plan).await
    }

    /// Probes every cluster resource and decides what to do with it.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe fails or a user-supplied instance
    /// profile does not exist.
    pub async fn plan(&self) -> Result<ReconciliationPlan> {
        let cloud = self.ctx.cloud;
        let naming = &self.ctx.naming;
        let cluster = &self.spec.cluster_name;

        info!("Planning cluster {}", cluster);
        let mut plan = ReconciliationPlan::new(
            format!("cluster {cluster}"),
            ConfigHasher::new().hash_cluster(self.spec),
        );

        // Instance role and profile
        if let Some(profile_name) = &self.spec.instance_profile_name {
            let profile = cloud
                .identity
                .get_instance_profile(profile_name)
                .await
                .for_resource(ResourceKind::InstanceProfile, profile_name)?
                .ok_or_else(|| ConfigError::InstanceProfileNotFound {
                    name: profile_name.clone(),
                })?;
            plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::InstanceProfile, profile_name, profile.arn),
                "user-supplied instance profile",
            );
        } else {
            let role_name = naming.instance_role(cluster);
            plan_role(self.ctx, &mut plan, &role_name, INSTANCE_POLICY_ARN).await?;

            let profile_name = naming.instance_profile(cluster);
            let profile = cloud
                .identity
                .get_instance_profile(&profile_name)
                .await
                .for_resource(ResourceKind::InstanceProfile, &profile_name)?;
            match profile {
                Some(p) if p.roles.contains(&role_name) => plan.push(
                    Action::Skip,
                    ResourceRef::present(ResourceKind::InstanceProfile, &profile_name, p.arn),
                    "exists",
                ),
                Some(p) => plan.push(
                    Action::Update,
                    ResourceRef::present(ResourceKind::InstanceProfile, &profile_name, p.arn),
                    "instance role not bound",
                ),
                None => plan.push(
                    Action::Create,
                    ResourceRef::absent(ResourceKind::InstanceProfile, &profile_name),
                    "not found",
                ),
            }
        }

        // Instance security group
        let group_name = naming.instance_security_group(cluster);
        let group = cloud
            .network
            .find_security_group(&group_name)
            .await
            .for_resource(ResourceKind::SecurityGroup, &group_name)?;
        match group {
            Some(g) => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::SecurityGroup, &group_name, g.id).with_tags(g.tags),
                "exists",
            ),
            None => plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::SecurityGroup, &group_name),
                "not found",
            ),
        }

        // Launch configuration
        let lc_name = naming.launch_configuration(cluster);
        let launch_configuration = cloud
            .compute
            .get_launch_configuration(&lc_name)
            .await
            .for_resource(ResourceKind::LaunchConfiguration, &lc_name)?;
        if launch_configuration.is_some() {
            plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::LaunchConfiguration, &lc_name, &lc_name),
                "exists",
            );
        } else {
            plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::LaunchConfiguration, &lc_name),
                "not found",
            );
        }

        // Autoscaling group
        let asg_name = naming.auto_scaling_group(cluster);
        let group = cloud
            .compute
            .get_auto_scaling_group(&asg_name)
            .await
            .for_resource(ResourceKind::AutoScalingGroup, &asg_name)?;
        match group {
            Some(g) if g.is_deleting() => plan.push(
                Action::Create,
                ResourceRef::present(ResourceKind::AutoScalingGroup, &asg_name, g.arn).with_tags(g.tags),
                "previous group is being deleted",
            ),
            Some(g) => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::AutoScalingGroup, &asg_name, g.arn).with_tags(g.tags),
                "exists",
            ),
            None => plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::AutoScalingGroup, &asg_name),
                "not found",
            ),
        }

        // Scheduler cluster
        let cluster_name = naming.cluster(cluster);
        let scheduler_cluster = cloud
            .scheduler
            .get_cluster(&cluster_name)
            .await
            .for_resource(ResourceKind::Cluster, &cluster_name)?;
        match scheduler_cluster {
            Some(c) if c.is_active() => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::Cluster, &cluster_name, c.arn),
                "active",
            ),
            Some(c) => plan.push(
                Action::Create,
                ResourceRef::present(ResourceKind::Cluster, &cluster_name, c.arn),
                "cluster is inactive",
            ),
            None => plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::Cluster, &cluster_name),
                "not found",
            ),
        }

        // Scheduler service role
        let service_role = naming.service_role(cluster);
        plan_role(self.ctx, &mut plan, &service_role, SERVICE_POLICY_ARN).await?;

        debug!("Cluster plan has {} actions", plan.actions.len());
        Ok(plan)
    }

    /// Applies a plan computed by [`Self::plan`].
    ///
    /// # Errors
    ///
    /// Returns the first provider error, or a retry error when the launch
    /// configuration cannot be created before the instance profile becomes
    /// visible.
    pub async fn apply(&self, plan: ReconciliationPlan) -> Result<ReconcileReport> {
        info!("Applying {}", plan.subject);

        let profile_name = self.apply_instance_profile(&plan).await?;
        let group_id = self.apply_security_group(&plan).await?;
        self.apply_launch_configuration(&plan, &profile_name, &group_id)
            .await?;
        self.apply_auto_scaling_group(&plan).await?;
        let cluster_name = self.apply_cluster(&plan).await?;

        let service_role = self.ctx.naming.service_role(&self.spec.cluster_name);
        apply_role(
            self.ctx,
            &plan,
            &service_role,
            SERVICE_TRUST_POLICY,
            SERVICE_POLICY_ARN,
        )
        .await?;

        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("cluster"), cluster_name);
        outputs.insert(
            String::from("auto_scaling_group"),
            self.ctx.naming.auto_scaling_group(&self.spec.cluster_name),
        );
        outputs.insert(String::from("instance_security_group"), group_id);

        info!("Cluster {} is ready", self.spec.cluster_name);
        Ok(ReconcileReport::new(plan, outputs))
    }

    async fn apply_instance_profile(&self, plan: &ReconciliationPlan) -> Result<String> {
        let ctx = self.ctx;
        if let Some(name) = &self.spec.instance_profile_name {
            ctx.emit_detail(
                ResourceKind::InstanceProfile,
                EventAction::Skipped,
                name,
                "user-supplied",
            );
            return Ok(name.clone());
        }

        let role_name = ctx.naming.instance_role(&self.spec.cluster_name);
        apply_role(
            ctx,
            plan,
            &role_name,
            INSTANCE_TRUST_POLICY,
            INSTANCE_POLICY_ARN,
        )
        .await?;

        let profile_name = ctx.naming.instance_profile(&self.spec.cluster_name);
        let step = plan.step(ResourceKind::InstanceProfile, &profile_name)?;
        let identity = &ctx.cloud.identity;
        match step.action {
            Action::Create => {
                identity
                    .create_instance_profile(&profile_name)
                    .await
                    .for_resource(ResourceKind::InstanceProfile, &profile_name)?;
                identity
                    .add_role_to_instance_profile(&profile_name, &role_name)
                    .await
                    .for_resource(ResourceKind::InstanceProfile, &profile_name)?;
                ctx.emit(ResourceKind::InstanceProfile, EventAction::Created, &profile_name);
            }
            Action::Update => {
                identity
                    .add_role_to_instance_profile(&profile_name, &role_name)
                    .await
                    .for_resource(ResourceKind::InstanceProfile, &profile_name)?;
                ctx.emit_detail(
                    ResourceKind::InstanceProfile,
                    EventAction::Updated,
                    &profile_name,
                    "bound instance role",
                );
            }
            Action::Skip | Action::Delete => {
                ctx.emit(ResourceKind::InstanceProfile, EventAction::Skipped, &profile_name);
            }
        }
        Ok(profile_name)
    }

    async fn apply_security_group(&self, plan: &ReconciliationPlan) -> Result<String> {
        let ctx = self.ctx;
        let name = ctx.naming.instance_security_group(&self.spec.cluster_name);
        let step = plan.step(ResourceKind::SecurityGroup, &name)?;
        if step.action != Action::Create {
            ctx.emit(ResourceKind::SecurityGroup, EventAction::Skipped, &name);
            return existing_id(step);
        }

        let (network_id, _) = ctx.network(self.spec.network_id.as_deref()).await?;
        let network = &ctx.cloud.network;
        let group = network
            .create_security_group(&SecurityGroupParams {
                name: name.clone(),
                description: format!(
                    "Instances of ecsdeploy cluster {}",
                    self.spec.cluster_name
                ),
                network_id,
            })
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        network
            .authorize_ingress(
                &group.id,
                &IngressRule::tcp(MANAGEMENT_PORT, IngressSource::Cidr(ANYWHERE.to_string())),
            )
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        network
            .tag_security_group(&group.id, &OwnershipTag::now().to_tags())
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;

        ctx.emit_detail(ResourceKind::SecurityGroup, EventAction::Created, &name, &group.id);
        Ok(group.id)
    }

    async fn apply_launch_configuration(
        &self,
        plan: &ReconciliationPlan,
        profile_name: &str,
        group_id: &str,
    ) -> Result<()> {
        let ctx = self.ctx;
        let name = ctx.naming.launch_configuration(&self.spec.cluster_name);
        let step = plan.step(ResourceKind::LaunchConfiguration, &name)?;
        if step.action != Action::Create {
            ctx.emit(ResourceKind::LaunchConfiguration, EventAction::Skipped, &name);
            return Ok(());
        }

        let params = LaunchConfigurationParams {
            name: name.clone(),
            instance_profile: profile_name.to_string(),
            instance_type: self.spec.instance_type.clone(),
            image_id: self.spec.image_id.clone(),
            key_pair: self.spec.key_pair_name.clone(),
            security_groups: vec![group_id.to_string()],
            user_data: user_data(&ctx.naming.cluster(&self.spec.cluster_name)),
        };

        // A fresh instance profile takes a while to become visible
        let compute = &ctx.cloud.compute;
        let params = &params;
        retry_on_codes(
            ctx.waits.iam_propagation,
            &format!("launch configuration {name}"),
            &[codes::INVALID_INSTANCE_PROFILE],
            move || async move {
                compute
                    .create_launch_configuration(params)
                    .await
                    .for_resource(ResourceKind::LaunchConfiguration, &params.name)
            },
        )
        .await?;

        ctx.emit(ResourceKind::LaunchConfiguration, EventAction::Created, &name);
        Ok(())
    }

    async fn apply_auto_scaling_group(&self, plan: &ReconciliationPlan) -> Result<()> {
        let ctx = self.ctx;
        let cluster = &self.spec.cluster_name;
        let name = ctx.naming.auto_scaling_group(cluster);
        let step = plan.step(ResourceKind::AutoScalingGroup, &name)?;
        if step.action != Action::Create {
            ctx.emit(ResourceKind::AutoScalingGroup, EventAction::Skipped, &name);
            return Ok(());
        }

        let compute = &ctx.cloud.compute;
        if step.resource.is_present() {
            ctx.emit_detail(
                ResourceKind::AutoScalingGroup,
                EventAction::Waiting,
                &name,
                "previous group is being deleted",
            );
            let group_name = name.as_str();
            wait_until(
                ctx.waits.resource_deletion,
                &format!("autoscaling group {name}"),
                "disappear",
                move || async move {
                    let group = compute
                        .get_auto_scaling_group(group_name)
                        .await
                        .for_resource(ResourceKind::AutoScalingGroup, group_name)?;
                    Ok(group.is_none().then_some(()))
                },
            )
            .await?;
        }

        let (_, subnets) = ctx.network(self.spec.network_id.as_deref()).await?;
        let capacity = self.spec.initial_capacity;
        compute
            .create_auto_scaling_group(&AutoScalingGroupParams {
                name: name.clone(),
                launch_configuration: ctx.naming.launch_configuration(cluster),
                subnets,
                desired: capacity,
                min: capacity,
                max: capacity,
            })
            .await
            .for_resource(ResourceKind::AutoScalingGroup, &name)?;
        compute
            .tag_auto_scaling_group(&name, &OwnershipTag::now().to_tags())
            .await
            .for_resource(ResourceKind::AutoScalingGroup, &name)?;

        ctx.emit_detail(
            ResourceKind::AutoScalingGroup,
            EventAction::Created,
            &name,
            &format!("{capacity} instances"),
        );
        Ok(())
    }

    async fn apply_cluster(&self, plan: &ReconciliationPlan) -> Result<String> {
        let ctx = self.ctx;
        let name = ctx.naming.cluster(&self.spec.cluster_name);
        let step = plan.step(ResourceKind::Cluster, &name)?;
        if step.action == Action::Create {
            ctx.cloud
                .scheduler
                .create_cluster(&name)
                .await
                .for_resource(ResourceKind::Cluster, &name)?;
            ctx.emit(ResourceKind::Cluster, EventAction::Created, &name);
        } else {
            ctx.emit(ResourceKind::Cluster, EventAction::Skipped, &name);
        }
        Ok(name)
    }
}

/// Boot script registering an instance with the scheduler cluster.
fn user_data(cluster: &str) -> String {
    format!("#!/bin/bash\necho ECS_CLUSTER={cluster} >> /etc/ecs/ecs.config\n")
}

async fn plan_role(
    ctx: &Context<'_>,
    plan: &mut ReconciliationPlan,
    name: &str,
    policy_arn: &str,
) -> Result<()> {
    let role = ctx
        .cloud
        .identity
        .get_role(name)
        .await
        .for_resource(ResourceKind::Role, name)?;
    match role {
        Some(r) if r.attached_policies.iter().any(|p| p == policy_arn) => plan.push(
            Action::Skip,
            ResourceRef::present(ResourceKind::Role, name, r.arn),
            "exists",
        ),
        Some(r) => plan.push(
            Action::Update,
            ResourceRef::present(ResourceKind::Role, name, r.arn),
            "policy not attached",
        ),
        None => plan.push(
            Action::Create,
            ResourceRef::absent(ResourceKind::Role, name),
            "not found",
        ),
    }
    Ok(())
}

async fn apply_role(
    ctx: &Context<'_>,
    plan: &ReconciliationPlan,
    name: &str,
    trust_policy: &str,
    policy_arn: &str,
) -> Result<()> {
    let step = plan.step(ResourceKind::Role, name)?;
    let identity = &ctx.cloud.identity;
    match step.action {
        Action::Create => {
            identity
                .create_role(name, trust_policy)
                .await
                .for_resource(ResourceKind::Role, name)?;
            identity
                .attach_role_policy(name, policy_arn)
                .await
                .for_resource(ResourceKind::Role, name)?;
            ctx.emit(ResourceKind::Role, EventAction::Created, name);
        }
        Action::Update => {
            identity
                .attach_role_policy(name, policy_arn)
                .await
                .for_resource(ResourceKind::Role, name)?;
            ctx.emit_detail(ResourceKind::Role, EventAction::Updated, name, "attached policy");
        }
        Action::Skip | Action::Delete => ctx.emit(ResourceKind::Role, EventAction::Skipped, name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ComputeApi, IdentityApi, SandboxSettings};
    use crate::error::{DeployError, ReconcileError};
    use crate::events::RecordingSink;
    use crate::reconciler::fixtures::{cluster_spec, sandbox, sandbox_with};
    use crate::retry::WaitPolicies;

    #[tokio::test]
    async fn test_creates_cluster_in_dependency_order() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 2);

        let report = ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        let creations: Vec<String> = memory
            .creations()
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            creations,
            vec![
                "create_role",
                "create_instance_profile",
                "create_security_group",
                "create_launch_configuration",
                "create_auto_scaling_group",
                "create_cluster",
                "create_role",
            ]
        );
        assert_eq!(report.created, 7);

        let ops = memory.operations();
        let pos = |op: &str| ops.iter().position(|o| o == op).unwrap();
        assert!(pos("tag_security_group") > pos("create_security_group"));
        assert!(pos("tag_security_group") < pos("create_launch_configuration"));
        assert!(pos("tag_auto_scaling_group") > pos("create_auto_scaling_group"));
        assert!(pos("tag_auto_scaling_group") < pos("create_cluster"));

        let group = memory
            .get_auto_scaling_group("ecsdeploy-cluster1-asg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!((group.desired, group.min, group.max), (2, 2, 2));
        assert_eq!(group.subnets.len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 2);

        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        memory.clear_calls();
        let report = ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        assert!(memory.creations().is_empty());
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 7);
        assert!(!report.plan.has_changes());

        let ops = memory.operations();
        let pos = |op: &str| ops.iter().position(|o| o == op).unwrap();
        assert!(pos("get_role") < pos("get_instance_profile"));
        assert!(pos("get_instance_profile") < pos("get_launch_configuration"));
        assert!(pos("get_launch_configuration") < pos("get_auto_scaling_group"));
        assert!(pos("get_auto_scaling_group") < pos("get_cluster"));
    }

    #[tokio::test]
    async fn test_profile_precedes_launch_configuration_when_role_exists() {
        let (memory, cloud) = sandbox();
        memory
            .create_role("ecsdeploy_cluster1_instance_role", INSTANCE_TRUST_POLICY)
            .await
            .unwrap();
        memory.clear_calls();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);

        let report = ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        let ops = memory.operations();
        let pos = |op: &str| ops.iter().position(|o| o == op).unwrap();
        assert!(pos("attach_role_policy") < pos("create_instance_profile"));
        assert!(pos("add_role_to_instance_profile") < pos("create_launch_configuration"));
        assert!(pos("create_launch_configuration") < pos("create_auto_scaling_group"));
        assert_eq!(
            report
                .plan
                .step(ResourceKind::Role, "ecsdeploy_cluster1_instance_role")
                .unwrap()
                .action,
            Action::Update
        );
    }

    #[tokio::test]
    async fn test_launch_configuration_waits_for_profile_visibility() {
        let (memory, cloud) = sandbox();
        memory.inject_fault(
            "create_launch_configuration",
            codes::INVALID_INSTANCE_PROFILE,
            Some(2),
        );
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);

        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        assert_eq!(memory.count("create_launch_configuration"), 3);
        assert_eq!(memory.count("create_auto_scaling_group"), 1);
    }

    #[tokio::test]
    async fn test_profile_never_visible_aborts_run() {
        let (memory, cloud) = sandbox();
        memory.inject_fault(
            "create_launch_configuration",
            codes::INVALID_INSTANCE_PROFILE,
            None,
        );
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);

        let err = ClusterReconciler::new(&ctx, &spec)
            .reconcile()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 10, .. })
        ));
        assert_eq!(memory.count("create_launch_configuration"), 10);
        assert_eq!(memory.count("create_auto_scaling_group"), 0);
        assert_eq!(memory.count("create_cluster"), 0);
    }

    #[tokio::test]
    async fn test_missing_profile_override_is_config_error() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut spec = cluster_spec("cluster1", 1);
        spec.instance_profile_name = Some(String::from("custom-profile"));

        let err = ClusterReconciler::new(&ctx, &spec)
            .reconcile()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigError::InstanceProfileNotFound { .. })
        ));
        assert!(memory.creations().is_empty());
    }

    #[tokio::test]
    async fn test_profile_override_skips_instance_role() {
        let (memory, cloud) = sandbox();
        memory.create_instance_profile("custom-profile").await.unwrap();
        memory.clear_calls();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut spec = cluster_spec("cluster1", 1);
        spec.instance_profile_name = Some(String::from("custom-profile"));

        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        // Only the service role is created
        assert_eq!(memory.count("create_role"), 1);
        assert_eq!(memory.count("create_instance_profile"), 0);
        let lc = memory
            .get_launch_configuration("ecsdeploy-cluster1-lc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lc.instance_profile, "custom-profile");
    }

    #[tokio::test]
    async fn test_waits_for_deleting_group_before_recreate() {
        let (memory, cloud) = sandbox_with(SandboxSettings {
            instance_drain_polls: 0,
            service_drain_polls: 0,
            group_delete_polls: 2,
        });
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        let asg = "ecsdeploy-cluster1-asg";
        memory.update_capacity(asg, 0, 0, 0).await.unwrap();
        memory.get_auto_scaling_group(asg).await.unwrap();
        memory.delete_auto_scaling_group(asg).await.unwrap();
        memory.clear_calls();

        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        assert_eq!(memory.count("create_auto_scaling_group"), 1);
        let group = memory.get_auto_scaling_group(asg).await.unwrap().unwrap();
        assert!(!group.is_deleting());
        assert!(!sink.with_action(EventAction::Waiting).is_empty());
    }

    #[test]
    fn test_user_data_registers_cluster() {
        let script = user_data("ecsdeploy-c1");
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("ECS_CLUSTER=ecsdeploy-c1"));
    }
}

//! Cluster teardown.
//!
//! Deletes the cluster topology in reverse dependency order. The
//! autoscaling group is scaled to zero and drained before it is deleted,
//! and deletes rejected because a dependent is still going away are
//! retried. Resources that are already gone are skipped.

use tracing::{debug, info, warn};

use crate::cloud::{ResourceKind, ResourceRef};
use crate::config::ConfigHasher;
use crate::error::{codes, DeployError, ProviderResultExt, Result};
use crate::events::EventAction;
use crate::model::ClusterSpec;
use crate::planner::{Action, ReconciliationPlan};
use crate::retry::{retry_on_codes, wait_until};
use crate::tagging::OwnershipTag;

use super::{existing_id, settle_deletion, Context, TeardownReport};

/// Plan reason of an autoscaling group an earlier run started deleting.
const GROUP_ALREADY_DELETING: &str = "already being deleted";

/// Deletes everything [`super::ClusterReconciler`] creates.
#[derive(Debug)]
pub struct ClusterTeardown<'a> {
    ctx: &'a Context<'a>,
    spec: &'a ClusterSpec,
    continue_on_error: bool,
}

impl<'a> ClusterTeardown<'a> {
    /// Creates a teardown for one cluster.
    #[must_use]
    pub const fn new(ctx: &'a Context<'a>, spec: &'a ClusterSpec) -> Self {
        Self {
            ctx,
            spec,
            continue_on_error: false,
        }
    }

    /// Keeps deleting the remaining resources after a failure.
    #[must_use]
    pub const fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Plans and applies in one go.
    ///
    /// # Errors
    ///
    /// Returns the first probe error, or the first deletion error unless
    /// continue-on-error is enabled.
    pub async fn teardown(&self) -> Result<TeardownReport> {
        let plan = self.plan().await?;
        self.apply(plan).await
    }

    /// Probes every cluster resource and decides whether to delete it.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe fails.
    pub async fn plan(&self) -> Result<ReconciliationPlan> {
        let cloud = self.ctx.cloud;
        let naming = &self.ctx.naming;
        let cluster = &self.spec.cluster_name;

        info!("Planning teardown of cluster {}", cluster);
        let mut plan = ReconciliationPlan::new(
            format!("cluster {cluster}"),
            ConfigHasher::new().hash_cluster(self.spec),
        );

        let service_role = naming.service_role(cluster);
        let role = cloud
            .identity
            .get_role(&service_role)
            .await
            .for_resource(ResourceKind::Role, &service_role)?;
        push_presence(&mut plan, ResourceKind::Role, &service_role, role.map(|r| r.arn));

        let cluster_name = naming.cluster(cluster);
        let scheduler_cluster = cloud
            .scheduler
            .get_cluster(&cluster_name)
            .await
            .for_resource(ResourceKind::Cluster, &cluster_name)?
            .filter(|c| c.is_active());
        push_presence(
            &mut plan,
            ResourceKind::Cluster,
            &cluster_name,
            scheduler_cluster.map(|c| c.arn),
        );

        let asg_name = naming.auto_scaling_group(cluster);
        let group = cloud
            .compute
            .get_auto_scaling_group(&asg_name)
            .await
            .for_resource(ResourceKind::AutoScalingGroup, &asg_name)?;
        match group {
            Some(g) if g.is_deleting() => plan.push(
                Action::Delete,
                ResourceRef::present(ResourceKind::AutoScalingGroup, &asg_name, g.arn),
                GROUP_ALREADY_DELETING,
            ),
            other => push_presence(
                &mut plan,
                ResourceKind::AutoScalingGroup,
                &asg_name,
                other.map(|g| g.arn),
            ),
        }

        let lc_name = naming.launch_configuration(cluster);
        let launch_configuration = cloud
            .compute
            .get_launch_configuration(&lc_name)
            .await
            .for_resource(ResourceKind::LaunchConfiguration, &lc_name)?;
        push_presence(
            &mut plan,
            ResourceKind::LaunchConfiguration,
            &lc_name,
            launch_configuration.map(|lc| lc.name),
        );

        if let Some(profile_name) = &self.spec.instance_profile_name {
            plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::InstanceProfile, profile_name),
                "user-supplied instance profile",
            );
        } else {
            let profile_name = naming.instance_profile(cluster);
            let profile = cloud
                .identity
                .get_instance_profile(&profile_name)
                .await
                .for_resource(ResourceKind::InstanceProfile, &profile_name)?;
            push_presence(
                &mut plan,
                ResourceKind::InstanceProfile,
                &profile_name,
                profile.map(|p| p.arn),
            );

            let role_name = naming.instance_role(cluster);
            let role = cloud
                .identity
                .get_role(&role_name)
                .await
                .for_resource(ResourceKind::Role, &role_name)?;
            push_presence(&mut plan, ResourceKind::Role, &role_name, role.map(|r| r.arn));
        }

        let group_name = naming.instance_security_group(cluster);
        let group = cloud
            .network
            .find_security_group(&group_name)
            .await
            .for_resource(ResourceKind::SecurityGroup, &group_name)?;
        match group {
            Some(g) if OwnershipTag::is_owned(&g.tags) => plan.push(
                Action::Delete,
                ResourceRef::present(ResourceKind::SecurityGroup, &group_name, g.id).with_tags(g.tags),
                "exists",
            ),
            Some(g) => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::SecurityGroup, &group_name, g.id).with_tags(g.tags),
                "not created by ecsdeploy",
            ),
            None => plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::SecurityGroup, &group_name),
                "not found",
            ),
        }

        Ok(plan)
    }

    /// Applies a teardown plan computed by [`Self::plan`].
    ///
    /// # Errors
    ///
    /// Returns the first deletion error unless continue-on-error is
    /// enabled, in which case failures are collected in the report.
    pub async fn apply(&self, plan: ReconciliationPlan) -> Result<TeardownReport> {
        info!("Tearing down {}", plan.subject);
        let mut report = TeardownReport::new(plan.clone());

        for step in &plan.actions {
            let name = step.resource.name.as_str();
            if step.action != Action::Delete {
                self.ctx.emit_detail(step.kind, EventAction::Skipped, name, &step.reason);
                continue;
            }

            let result = match step.kind {
                ResourceKind::Role => self.delete_role(name).await,
                ResourceKind::Cluster => self.delete_cluster(name).await,
                ResourceKind::AutoScalingGroup => {
                    let already_deleting = step.reason == GROUP_ALREADY_DELETING;
                    self.delete_auto_scaling_group(name, already_deleting).await
                }
                ResourceKind::LaunchConfiguration => self.delete_launch_configuration(name).await,
                ResourceKind::InstanceProfile => self.delete_instance_profile(name).await,
                ResourceKind::SecurityGroup => match existing_id(step) {
                    Ok(id) => self.delete_security_group(name, &id).await,
                    Err(e) => Err(e),
                },
                other => Err(DeployError::internal(format!(
                    "unexpected {other} '{name}' in cluster teardown plan"
                ))),
            };
            settle_deletion(
                self.ctx,
                &mut report,
                step.kind,
                name,
                result,
                self.continue_on_error,
            )?;
        }

        if report.success() {
            info!("Cluster {} torn down", self.spec.cluster_name);
        } else {
            warn!(
                "Cluster {} torn down with {} failures",
                self.spec.cluster_name,
                report.failures.len()
            );
        }
        Ok(report)
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let identity = &self.ctx.cloud.identity;
        let Some(role) = identity
            .get_role(name)
            .await
            .for_resource(ResourceKind::Role, name)?
        else {
            return Ok(());
        };
        for policy in &role.attached_policies {
            identity
                .detach_role_policy(name, policy)
                .await
                .for_resource(ResourceKind::Role, name)?;
        }
        identity
            .delete_role(name)
            .await
            .for_resource(ResourceKind::Role, name)
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.ctx
            .cloud
            .scheduler
            .delete_cluster(name)
            .await
            .for_resource(ResourceKind::Cluster, name)
    }

    /// Scales the group to zero, waits for its instances to drain, deletes
    /// it and waits until it is gone. A group an interrupted run already
    /// deleted is only waited for.
    async fn delete_auto_scaling_group(&self, name: &str, already_deleting: bool) -> Result<()> {
        let ctx = self.ctx;
        let compute = &ctx.cloud.compute;

        if already_deleting {
            ctx.emit_detail(
                ResourceKind::AutoScalingGroup,
                EventAction::Waiting,
                name,
                GROUP_ALREADY_DELETING,
            );
            return self.wait_for_group_gone(name).await;
        }

        compute
            .update_capacity(name, 0, 0, 0)
            .await
            .for_resource(ResourceKind::AutoScalingGroup, name)?;
        ctx.emit_detail(
            ResourceKind::AutoScalingGroup,
            EventAction::Waiting,
            name,
            "draining instances",
        );
        wait_until(
            ctx.waits.instance_drain,
            &format!("autoscaling group {name}"),
            "drain",
            move || async move {
                let group = compute
                    .get_auto_scaling_group(name)
                    .await
                    .for_resource(ResourceKind::AutoScalingGroup, name)?;
                Ok(match group {
                    Some(g) if g.instance_count > 0 => None,
                    _ => Some(()),
                })
            },
        )
        .await?;

        match compute.delete_auto_scaling_group(name).await {
            Err(e) if e.is_not_found() => {
                debug!("Autoscaling group {} already gone", name);
                return Ok(());
            }
            result => result.for_resource(ResourceKind::AutoScalingGroup, name)?,
        }
        self.wait_for_group_gone(name).await
    }

    async fn wait_for_group_gone(&self, name: &str) -> Result<()> {
        let ctx = self.ctx;
        let compute = &ctx.cloud.compute;
        wait_until(
            ctx.waits.resource_deletion,
            &format!("autoscaling group {name}"),
            "disappear",
            move || async move {
                let group = compute
                    .get_auto_scaling_group(name)
                    .await
                    .for_resource(ResourceKind::AutoScalingGroup, name)?;
                Ok(group.is_none().then_some(()))
            },
        )
        .await
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let compute = &self.ctx.cloud.compute;
        retry_on_codes(
            self.ctx.waits.transient_error,
            &format!("launch configuration {name}"),
            &[codes::RESOURCE_IN_USE],
            move || async move {
                compute
                    .delete_launch_configuration(name)
                    .await
                    .for_resource(ResourceKind::LaunchConfiguration, name)
            },
        )
        .await
    }

    async fn delete_instance_profile(&self, name: &str) -> Result<()> {
        let identity = &self.ctx.cloud.identity;
        let Some(profile) = identity
            .get_instance_profile(name)
            .await
            .for_resource(ResourceKind::InstanceProfile, name)?
        else {
            return Ok(());
        };
        for role in &profile.roles {
            identity
                .remove_role_from_instance_profile(name, role)
                .await
                .for_resource(ResourceKind::InstanceProfile, name)?;
        }
        identity
            .delete_instance_profile(name)
            .await
            .for_resource(ResourceKind::InstanceProfile, name)
    }

    async fn delete_security_group(&self, name: &str, id: &str) -> Result<()> {
        let network = &self.ctx.cloud.network;
        retry_on_codes(
            self.ctx.waits.transient_error,
            &format!("security group {name}"),
            &[codes::DEPENDENCY_VIOLATION, codes::RESOURCE_IN_USE],
            move || async move {
                network
                    .delete_security_group(id)
                    .await
                    .for_resource(ResourceKind::SecurityGroup, name)
            },
        )
        .await
    }
}

fn push_presence(
    plan: &mut ReconciliationPlan,
    kind: ResourceKind,
    name: &str,
    identifier: Option<String>,
) {
    match identifier {
        Some(id) => plan.push(Action::Delete, ResourceRef::present(kind, name, id), "exists"),
        None => plan.push(Action::Skip, ResourceRef::absent(kind, name), "not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ComputeApi, NetworkApi, SandboxSettings, SchedulerApi};
    use crate::events::RecordingSink;
    use crate::reconciler::fixtures::{cluster_spec, sandbox, sandbox_with};
    use crate::reconciler::ClusterReconciler;
    use crate::retry::WaitPolicies;

    #[tokio::test]
    async fn test_teardown_removes_everything() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 2);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        let report = ClusterTeardown::new(&ctx, &spec).teardown().await.unwrap();

        assert!(report.success());
        assert_eq!(report.deleted, 7);
        let state = memory.snapshot();
        assert!(state.roles.is_empty());
        assert!(state.instance_profiles.is_empty());
        assert!(state.launch_configurations.is_empty());
        assert!(state.auto_scaling_groups.is_empty());
        assert!(
            memory
                .find_security_group("ecsdeploy_cluster1_instance_sg")
                .await
                .unwrap()
                .is_none()
        );
        let cluster = memory.get_cluster("ecsdeploy-cluster1").await.unwrap().unwrap();
        assert!(!cluster.is_active());
    }

    #[tokio::test]
    async fn test_group_is_drained_before_delete() {
        let (memory, cloud) = sandbox_with(SandboxSettings {
            instance_drain_polls: 3,
            service_drain_polls: 0,
            group_delete_polls: 0,
        });
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 2);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        memory.clear_calls();

        ClusterTeardown::new(&ctx, &spec).teardown().await.unwrap();

        let ops = memory.operations();
        let scale = ops.iter().position(|o| o == "update_capacity").unwrap();
        let delete = ops
            .iter()
            .position(|o| o == "delete_auto_scaling_group")
            .unwrap();
        let polls = ops[scale..delete]
            .iter()
            .filter(|o| *o == "get_auto_scaling_group")
            .count();
        assert_eq!(polls, 4);
        assert_eq!(memory.count("delete_auto_scaling_group"), 1);
    }

    #[tokio::test]
    async fn test_second_teardown_is_a_no_op() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        ClusterTeardown::new(&ctx, &spec).teardown().await.unwrap();
        memory.clear_calls();

        let report = ClusterTeardown::new(&ctx, &spec).teardown().await.unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 7);
        assert!(memory.operations().iter().all(|o| !o.starts_with("delete_")));
    }

    #[tokio::test]
    async fn test_rerun_after_interrupted_group_delete() {
        let (memory, cloud) = sandbox_with(SandboxSettings {
            instance_drain_polls: 0,
            service_drain_polls: 0,
            group_delete_polls: 1,
        });
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();

        // An earlier teardown got as far as deleting the group
        let asg = "ecsdeploy-cluster1-asg";
        memory.update_capacity(asg, 0, 0, 0).await.unwrap();
        memory.get_auto_scaling_group(asg).await.unwrap();
        memory.delete_auto_scaling_group(asg).await.unwrap();
        memory.clear_calls();

        let teardown = ClusterTeardown::new(&ctx, &spec);
        let plan = teardown.plan().await.unwrap();
        let step = plan.find(ResourceKind::AutoScalingGroup, asg).unwrap();
        assert_eq!(step.reason, GROUP_ALREADY_DELETING);

        let report = teardown.apply(plan).await.unwrap();

        assert!(report.success());
        assert_eq!(memory.count("update_capacity"), 0);
        assert_eq!(memory.count("delete_auto_scaling_group"), 0);
        let state = memory.snapshot();
        assert!(state.auto_scaling_groups.is_empty());
        assert!(state.launch_configurations.is_empty());
        assert!(state.instance_profiles.is_empty());
        assert!(state.roles.is_empty());
    }

    #[tokio::test]
    async fn test_group_vanishing_before_delete_is_not_a_failure() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        memory.inject_fault("delete_auto_scaling_group", codes::NOT_FOUND, Some(1));

        let report = ClusterTeardown::new(&ctx, &spec)
            .continue_on_error(true)
            .teardown()
            .await
            .unwrap();

        assert!(
            report
                .failures
                .iter()
                .all(|f| f.kind != ResourceKind::AutoScalingGroup)
        );
        assert_eq!(memory.count("delete_auto_scaling_group"), 1);
    }

    #[tokio::test]
    async fn test_unexpected_kind_is_not_counted_as_deleted() {
        let (_memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        let mut plan = ReconciliationPlan::new("cluster cluster1", String::from("h"));
        plan.push(
            Action::Delete,
            ResourceRef::present(ResourceKind::Repository, "ecsdeploy/echo", "arn:repo"),
            "exists",
        );

        let report = ClusterTeardown::new(&ctx, &spec)
            .continue_on_error(true)
            .apply(plan)
            .await
            .unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("unexpected"));
    }

    #[tokio::test]
    async fn test_foreign_security_group_is_kept() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        memory
            .create_security_group(&crate::cloud::SecurityGroupParams {
                name: String::from("ecsdeploy_cluster1_instance_sg"),
                description: String::from("managed elsewhere"),
                network_id: crate::cloud::DEFAULT_NETWORK.to_string(),
            })
            .await
            .unwrap();

        let plan = ClusterTeardown::new(&ctx, &spec).plan().await.unwrap();

        let step = plan
            .find(ResourceKind::SecurityGroup, "ecsdeploy_cluster1_instance_sg")
            .unwrap();
        assert_eq!(step.action, Action::Skip);
    }

    #[tokio::test]
    async fn test_failure_stops_teardown_by_default() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        memory.inject_fault("delete_cluster", codes::THROTTLING, None);

        let err = ClusterTeardown::new(&ctx, &spec).teardown().await.unwrap_err();

        assert!(matches!(err, DeployError::Provider { kind: ResourceKind::Cluster, .. }));
        assert_eq!(memory.count("delete_auto_scaling_group"), 0);
        assert!(
            memory
                .get_launch_configuration("ecsdeploy-cluster1-lc")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_continue_on_error_collects_failures() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let spec = cluster_spec("cluster1", 1);
        ClusterReconciler::new(&ctx, &spec).reconcile().await.unwrap();
        memory.inject_fault("delete_cluster", codes::THROTTLING, None);

        let report = ClusterTeardown::new(&ctx, &spec)
            .continue_on_error(true)
            .teardown()
            .await
            .unwrap();

        assert!(!report.success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ResourceKind::Cluster);
        assert_eq!(report.deleted, 6);
        assert!(memory.snapshot().auto_scaling_groups.is_empty());
        assert_eq!(sink.with_action(EventAction::Failed).len(), 1);
    }
}

//! Application teardown.
//!
//! Removes what [`super::DeploymentReconciler`] created for one
//! application. Load balancers and security groups are only deleted when
//! they carry the ownership tag; a shared load balancer is merely detached
//! from by deleting this application's listener and target group.

use tracing::{info, warn};

use crate::cloud::{IngressSource, ResourceKind, ResourceRef, ServiceUpdate};
use crate::config::ConfigHasher;
use crate::error::{codes, DeployError, ProviderResultExt, Result};
use crate::events::EventAction;
use crate::model::AppSpec;
use crate::planner::{Action, PlannedAction, ReconciliationPlan};
use crate::retry::{retry_on_codes, wait_until};
use crate::tagging::OwnershipTag;

use super::{existing_id, settle_deletion, Context, TeardownFailure, TeardownReport};

/// Deletes one application's resources.
#[derive(Debug)]
pub struct DeploymentTeardown<'a> {
    ctx: &'a Context<'a>,
    app: &'a AppSpec,
    continue_on_error: bool,
    keep_repository: bool,
}

impl<'a> DeploymentTeardown<'a> {
    /// Creates a teardown for one application.
    #[must_use]
    pub const fn new(ctx: &'a Context<'a>, app: &'a AppSpec) -> Self {
        Self {
            ctx,
            app,
            continue_on_error: false,
            keep_repository: false,
        }
    }

    /// Keeps deleting the remaining resources after a failure.
    #[must_use]
    pub const fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Leaves the image repository and its images in place.
    #[must_use]
    pub const fn keep_repository(mut self, enabled: bool) -> Self {
        self.keep_repository = enabled;
        self
    }

    fn load_balancer_name(&self) -> String {
        self.app
            .load_balancer
            .as_ref()
            .and_then(|lb| lb.name.clone())
            .unwrap_or_else(|| self.ctx.naming.load_balancer(&self.app.app_name))
    }

    fn instance_group_name(&self) -> String {
        self.ctx
            .naming
            .instance_security_group(&self.app.cluster_name)
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

    /// Probes the application's resources and decides what may be deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe fails.
    #[allow(clippy::too_many_lines)]
    pub async fn plan(&self) -> Result<ReconciliationPlan> {
        let cloud = self.ctx.cloud;
        let naming = &self.ctx.naming;
        let app = self.app;

        info!("Planning teardown of app {}", app.app_name);
        let mut plan = ReconciliationPlan::new(
            format!("app {}", app.app_name),
            ConfigHasher::new().hash_app(app),
        );

        // Service
        let cluster = naming.cluster(&app.cluster_name);
        let service_name = naming.service(&app.app_name);
        let service = cloud
            .scheduler
            .get_service(&cluster, &service_name)
            .await
            .for_resource(ResourceKind::Service, &service_name)?;
        match service {
            Some(s) if s.is_active() || s.is_draining() => plan.push(
                Action::Delete,
                ResourceRef::present(ResourceKind::Service, &service_name, s.arn),
                "exists",
            ),
            _ => plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::Service, &service_name),
                "not found",
            ),
        }

        // Listeners, target group and load balancer
        let lbs = &cloud.load_balancing;
        let lb_name = self.load_balancer_name();
        let tg_name = naming.target_group(&app.app_name);
        let target_group = lbs
            .get_target_group(&tg_name)
            .await
            .for_resource(ResourceKind::TargetGroup, &tg_name)?;
        let load_balancer = lbs
            .get_load_balancer(&lb_name)
            .await
            .for_resource(ResourceKind::LoadBalancer, &lb_name)?;

        let mut other_listeners = 0;
        if let Some(lb) = &load_balancer {
            let listeners = lbs
                .list_listeners(&lb.arn)
                .await
                .for_resource(ResourceKind::Listener, &lb_name)?;
            for listener in listeners {
                let ours = target_group
                    .as_ref()
                    .is_some_and(|tg| tg.arn == listener.target_group_arn);
                if ours {
                    plan.push(
                        Action::Delete,
                        ResourceRef::present(
                            ResourceKind::Listener,
                            format!("{lb_name}:{}", listener.port),
                            listener.arn,
                        ),
                        "forwards to this app",
                    );
                } else {
                    other_listeners += 1;
                }
            }
        }

        match &target_group {
            Some(tg) => plan.push(
                Action::Delete,
                ResourceRef::present(ResourceKind::TargetGroup, &tg_name, &tg.arn),
                "exists",
            ),
            None => plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::TargetGroup, &tg_name),
                "not found",
            ),
        }

        let (lb_step, group_ids) = match load_balancer {
            Some(lb) if !OwnershipTag::is_owned(&lb.tags) => (
                (
                    Action::Skip,
                    ResourceRef::present(ResourceKind::LoadBalancer, &lb_name, lb.arn).with_tags(lb.tags),
                    "not created by ecsdeploy",
                ),
                vec![],
            ),
            Some(lb) if other_listeners > 0 => (
                (
                    Action::Skip,
                    ResourceRef::present(ResourceKind::LoadBalancer, &lb_name, lb.arn).with_tags(lb.tags),
                    "still serves other listeners",
                ),
                vec![],
            ),
            Some(lb) => (
                (
                    Action::Delete,
                    ResourceRef::present(ResourceKind::LoadBalancer, &lb_name, lb.arn)
                        .with_tags(lb.tags),
                    "exists",
                ),
                lb.security_groups,
            ),
            None => {
                // A group left behind by an interrupted run
                let derived = naming.load_balancer_security_group(&app.app_name);
                let leftover = cloud
                    .network
                    .find_security_group(&derived)
                    .await
                    .for_resource(ResourceKind::SecurityGroup, &derived)?;
                (
                    (
                        Action::Skip,
                        ResourceRef::absent(ResourceKind::LoadBalancer, &lb_name),
                        "not found",
                    ),
                    leftover.map(|g| g.id).into_iter().collect(),
                )
            }
        };

        // Load balancer security groups, owned ones only
        let mut groups = vec![];
        for id in group_ids {
            let group = cloud
                .network
                .get_security_group(&id)
                .await
                .for_resource(ResourceKind::SecurityGroup, &id)?;
            match group {
                Some(g) if OwnershipTag::is_owned(&g.tags) => groups.push((
                    Action::Delete,
                    ResourceRef::present(ResourceKind::SecurityGroup, &g.name, g.id).with_tags(g.tags),
                    "exists",
                )),
                Some(g) => groups.push((
                    Action::Skip,
                    ResourceRef::present(ResourceKind::SecurityGroup, &g.name, g.id).with_tags(g.tags),
                    "not created by ecsdeploy",
                )),
                None => {}
            }
        }

        // Instance ingress from the groups about to go away
        let doomed: Vec<String> = groups
            .iter()
            .filter(|(action, _, _)| *action == Action::Delete)
            .filter_map(|(_, r, _)| r.identifier.clone())
            .collect();
        let instance_name = self.instance_group_name();
        let instance_group = cloud
            .network
            .find_security_group(&instance_name)
            .await
            .for_resource(ResourceKind::SecurityGroup, &instance_name)?;
        if let Some(g) = instance_group {
            if doomed.iter().any(|id| g.allows_group(id)) {
                plan.push(
                    Action::Update,
                    ResourceRef::present(ResourceKind::SecurityGroup, &instance_name, g.id),
                    "revoke load balancer ingress",
                );
            }
        }

        let (action, resource, reason) = lb_step;
        plan.push(action, resource, reason);
        for (action, resource, reason) in groups {
            plan.push(action, resource, reason);
        }

        // Repository
        let repo_name = naming.repository(&app.app_name);
        if self.keep_repository {
            plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::Repository, &repo_name),
                "kept on request",
            );
        } else {
            let repository = cloud
                .registry
                .get_repository(&repo_name)
                .await
                .for_resource(ResourceKind::Repository, &repo_name)?;
            match repository {
                Some(r) => plan.push(
                    Action::Delete,
                    ResourceRef::present(ResourceKind::Repository, &repo_name, r.arn),
                    "exists",
                ),
                None => plan.push(
                    Action::Skip,
                    ResourceRef::absent(ResourceKind::Repository, &repo_name),
                    "not found",
                ),
            }
        }

        Ok(plan)
    }

    /// Applies a teardown plan computed by [`Self::plan`].
    ///
    /// # Errors
    ///
    /// Returns the first failure unless continue-on-error is enabled.
    pub async fn apply(&self, plan: ReconciliationPlan) -> Result<TeardownReport> {
        info!("Tearing down {}", plan.subject);
        let mut report = TeardownReport::new(plan.clone());
        let doomed_groups: Vec<String> = plan
            .actions
            .iter()
            .filter(|a| a.kind == ResourceKind::SecurityGroup && a.action == Action::Delete)
            .filter_map(|a| a.resource.identifier.clone())
            .collect();

        for step in &plan.actions {
            let name = step.resource.name.as_str();
            match step.action {
                Action::Delete => {
                    let result = self.delete(step).await;
                    settle_deletion(
                        self.ctx,
                        &mut report,
                        step.kind,
                        name,
                        result,
                        self.continue_on_error,
                    )?;
                }
                Action::Update => {
                    let result = self.revoke_ingress(step, &doomed_groups).await;
                    self.settle_update(&mut report, step, result)?;
                }
                Action::Skip | Action::Create => {
                    self.ctx
                        .emit_detail(step.kind, EventAction::Skipped, name, &step.reason);
                }
            }
        }

        if report.success() {
            info!("App {} torn down", self.app.app_name);
        } else {
            warn!(
                "App {} torn down with {} failures",
                self.app.app_name,
                report.failures.len()
            );
        }
        Ok(report)
    }

    fn settle_update(
        &self,
        report: &mut TeardownReport,
        step: &PlannedAction,
        result: Result<()>,
    ) -> Result<()> {
        let name = step.resource.name.as_str();
        match result {
            Ok(()) => {
                self.ctx
                    .emit_detail(step.kind, EventAction::Updated, name, &step.reason);
                Ok(())
            }
            Err(e) => {
                self.ctx
                    .emit_detail(step.kind, EventAction::Failed, name, &e.to_string());
                if !self.continue_on_error {
                    return Err(e);
                }
                report.failures.push(TeardownFailure {
                    kind: step.kind,
                    name: name.to_string(),
                    error: e.to_string(),
                });
                Ok(())
            }
        }
    }

    async fn delete(&self, step: &PlannedAction) -> Result<()> {
        let name = step.resource.name.as_str();
        let id = existing_id(step)?;
        match step.kind {
            ResourceKind::Service => self.delete_service(name).await,
            ResourceKind::Listener => self
                .ctx
                .cloud
                .load_balancing
                .delete_listener(&id)
                .await
                .for_resource(ResourceKind::Listener, name),
            ResourceKind::TargetGroup => self.delete_target_group(name, &id).await,
            ResourceKind::LoadBalancer => self.delete_load_balancer(name, &id).await,
            ResourceKind::SecurityGroup => self.delete_security_group(name, &id).await,
            ResourceKind::Repository => self
                .ctx
                .cloud
                .registry
                .delete_repository(name)
                .await
                .for_resource(ResourceKind::Repository, name),
            other => Err(DeployError::internal(format!(
                "unexpected {other} '{name}' in app teardown plan"
            ))),
        }
    }

    /// Scales the service to zero, waits for its tasks to stop, deletes it
    /// and waits for it to become inactive.
    async fn delete_service(&self, name: &str) -> Result<()> {
        let ctx = self.ctx;
        let scheduler = &ctx.cloud.scheduler;
        let cluster = ctx.naming.cluster(&self.app.cluster_name);
        let cluster = cluster.as_str();

        let active = scheduler
            .get_service(cluster, name)
            .await
            .for_resource(ResourceKind::Service, name)?
            .is_some_and(|s| s.is_active());
        if active {
            scheduler
                .update_service(
                    cluster,
                    name,
                    &ServiceUpdate {
                        task_definition: None,
                        desired_count: Some(0),
                    },
                )
                .await
                .for_resource(ResourceKind::Service, name)?;
            ctx.emit_detail(ResourceKind::Service, EventAction::Waiting, name, "stopping tasks");
            wait_until(
                ctx.waits.service_drain,
                &format!("service {name}"),
                "stop all tasks",
                move || async move {
                    let service = scheduler
                        .get_service(cluster, name)
                        .await
                        .for_resource(ResourceKind::Service, name)?;
                    Ok(match service {
                        Some(s) if s.running_count > 0 => None,
                        _ => Some(()),
                    })
                },
            )
            .await?;

            scheduler
                .delete_service(cluster, name)
                .await
                .for_resource(ResourceKind::Service, name)?;
        }

        wait_until(
            ctx.waits.service_drain,
            &format!("service {name}"),
            "become inactive",
            move || async move {
                let service = scheduler
                    .get_service(cluster, name)
                    .await
                    .for_resource(ResourceKind::Service, name)?;
                Ok(match service {
                    Some(s) if s.is_active() || s.is_draining() => None,
                    _ => Some(()),
                })
            },
        )
        .await
    }

    async fn delete_target_group(&self, name: &str, arn: &str) -> Result<()> {
        let lbs = &self.ctx.cloud.load_balancing;
        retry_on_codes(
            self.ctx.waits.transient_error,
            &format!("target group {name}"),
            &[codes::RESOURCE_IN_USE],
            move || async move {
                lbs.delete_target_group(arn)
                    .await
                    .for_resource(ResourceKind::TargetGroup, name)
            },
        )
        .await
    }

    async fn delete_load_balancer(&self, name: &str, arn: &str) -> Result<()> {
        let ctx = self.ctx;
        let lbs = &ctx.cloud.load_balancing;
        lbs.delete_load_balancer(arn)
            .await
            .for_resource(ResourceKind::LoadBalancer, name)?;
        wait_until(
            ctx.waits.resource_deletion,
            &format!("load balancer {name}"),
            "disappear",
            move || async move {
                let lb = lbs
                    .get_load_balancer(name)
                    .await
                    .for_resource(ResourceKind::LoadBalancer, name)?;
                Ok(lb.is_none().then_some(()))
            },
        )
        .await
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

    /// Removes instance ingress rules whose source is one of `groups`.
    async fn revoke_ingress(&self, step: &PlannedAction, groups: &[String]) -> Result<()> {
        let network = &self.ctx.cloud.network;
        let name = step.resource.name.as_str();
        let id = existing_id(step)?;
        let Some(group) = network
            .get_security_group(&id)
            .await
            .for_resource(ResourceKind::SecurityGroup, name)?
        else {
            return Ok(());
        };

        for rule in &group.ingress {
            let from_doomed = matches!(&rule.source, IngressSource::Group(g) if groups.contains(g));
            if from_doomed {
                network
                    .revoke_ingress(&id, rule)
                    .await
                    .for_resource(ResourceKind::SecurityGroup, name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        LoadBalancerApi, LoadBalancerParams, NetworkApi, RegistryApi, SchedulerApi,
        SecurityGroupParams, DEFAULT_NETWORK,
    };
    use crate::events::RecordingSink;
    use crate::reconciler::fixtures::{app_spec, cluster_spec, sandbox};
    use crate::reconciler::{ClusterReconciler, DeploymentReconciler};
    use crate::retry::WaitPolicies;

    #[tokio::test]
    async fn test_teardown_removes_owned_app_resources() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, &cluster_spec("cluster1", 1))
            .reconcile()
            .await
            .unwrap();
        let app = app_spec("echo", "cluster1");
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let report = DeploymentTeardown::new(&ctx, &app).teardown().await.unwrap();

        assert!(report.success());
        let state = memory.snapshot();
        assert!(state.load_balancers.is_empty());
        assert!(state.target_groups.is_empty());
        assert!(state.listeners.is_empty());
        assert!(state.repositories.is_empty());
        assert!(
            memory
                .find_security_group("ecsdeploy_echo_lb_sg")
                .await
                .unwrap()
                .is_none()
        );
        let instance_group = memory
            .find_security_group("ecsdeploy_cluster1_instance_sg")
            .await
            .unwrap()
            .unwrap();
        assert!(
            instance_group
                .ingress
                .iter()
                .all(|r| !matches!(r.source, IngressSource::Group(_)))
        );
        let service = memory
            .get_service("ecsdeploy-cluster1", "echo")
            .await
            .unwrap()
            .unwrap();
        assert!(!service.is_active());

        let ops = memory.operations();
        let scale = ops.iter().position(|o| o == "update_service").unwrap();
        let delete = ops.iter().position(|o| o == "delete_service").unwrap();
        assert!(scale < delete);
    }

    #[tokio::test]
    async fn test_shared_untagged_load_balancer_is_left_alone() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, &cluster_spec("cluster1", 1))
            .reconcile()
            .await
            .unwrap();
        let web = memory
            .create_security_group(&SecurityGroupParams {
                name: String::from("shared-web"),
                description: String::from("web"),
                network_id: DEFAULT_NETWORK.to_string(),
            })
            .await
            .unwrap();
        memory
            .create_load_balancer(&LoadBalancerParams {
                name: String::from("shared-lb"),
                subnets: vec![String::from("subnet-sandbox-a")],
                security_groups: vec![web.id.clone()],
            })
            .await
            .unwrap();
        let mut app = app_spec("echo", "cluster1");
        app.load_balancer.as_mut().unwrap().name = Some(String::from("shared-lb"));
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();
        memory.clear_calls();

        let report = DeploymentTeardown::new(&ctx, &app).teardown().await.unwrap();

        assert!(report.success());
        assert_eq!(memory.count("delete_load_balancer"), 0);
        assert_eq!(memory.count("delete_security_group"), 0);
        assert_eq!(memory.count("delete_listener"), 1);
        assert_eq!(memory.count("delete_target_group"), 1);
        assert_eq!(memory.count("delete_service"), 1);
        assert!(memory.get_load_balancer("shared-lb").await.unwrap().is_some());
        assert!(memory.get_security_group(&web.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repository_can_be_kept() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, &cluster_spec("cluster1", 1))
            .reconcile()
            .await
            .unwrap();
        let app = app_spec("echo", "cluster1");
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        DeploymentTeardown::new(&ctx, &app)
            .keep_repository(true)
            .teardown()
            .await
            .unwrap();

        assert_eq!(memory.count("delete_repository"), 0);
        assert!(memory.get_repository("ecsdeploy/echo").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_teardown_of_missing_app_deletes_nothing() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let app = app_spec("echo", "cluster1");

        let report = DeploymentTeardown::new(&ctx, &app).teardown().await.unwrap();

        assert_eq!(report.deleted, 0);
        assert!(memory.operations().iter().all(|o| !o.starts_with("delete_")));
    }

    #[tokio::test]
    async fn test_unexpected_kind_fails_instead_of_counting() {
        let (_memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let app = app_spec("echo", "cluster1");
        let mut plan = ReconciliationPlan::new("app echo", String::from("h"));
        plan.push(
            Action::Delete,
            ResourceRef::present(ResourceKind::LaunchConfiguration, "ecsdeploy-cluster1-lc", "lc"),
            "exists",
        );

        let err = DeploymentTeardown::new(&ctx, &app).apply(plan).await.unwrap_err();

        assert!(matches!(err, DeployError::Internal(_)));
        assert!(sink.with_action(EventAction::Deleted).is_empty());
    }

    #[tokio::test]
    async fn test_target_group_failure_can_be_skipped_past() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, &cluster_spec("cluster1", 1))
            .reconcile()
            .await
            .unwrap();
        let app = app_spec("echo", "cluster1");
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();
        memory.inject_fault("delete_target_group", codes::RESOURCE_IN_USE, None);

        let report = DeploymentTeardown::new(&ctx, &app)
            .continue_on_error(true)
            .teardown()
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ResourceKind::TargetGroup);
        assert_eq!(memory.count("delete_target_group"), 60);
        assert!(memory.snapshot().load_balancers.is_empty());
        assert!(memory.snapshot().repositories.is_empty());
    }
}

//! Deployment reconciler.
//!
//! Creates or updates an application on an existing cluster: image
//! repository, a new task definition revision on every run, and the
//! scheduler service. A service that is already active is updated in
//! place; otherwise the load balancer chain is built first and the
//! service is created behind it.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::cloud::{
    ContainerDefinition, DeploymentPolicy, HealthCheckParams, LogConfiguration, PortMapping,
    ResourceKind, ResourceRef, ServiceLoadBalancer, ServiceParams, ServiceUpdate,
    TaskDefinitionParams,
};
use crate::config::units::{cpu_units, memory_mib};
use crate::config::ConfigHasher;
use crate::error::{ConfigError, ProviderResultExt, Result};
use crate::events::EventAction;
use crate::model::{AppSpec, ImageSource};
use crate::planner::{Action, ReconciliationPlan};
use crate::retry::wait_until;

use super::load_balancer::{health_check_params, LoadBalancerChain};
use super::{existing_id, Context, ReconcileReport};

/// Everything derived from the app spec before the cloud is touched.
#[derive(Debug, Clone)]
struct Resolved {
    cpu: u32,
    memory_mib: u32,
    port: Option<u16>,
    health_check: Option<HealthCheckParams>,
}

/// Deploys one application.
#[derive(Debug)]
pub struct DeploymentReconciler<'a> {
    ctx: &'a Context<'a>,
    app: &'a AppSpec,
}

impl<'a> DeploymentReconciler<'a> {
    /// Creates a reconciler for one application.
    #[must_use]
    pub const fn new(ctx: &'a Context<'a>, app: &'a AppSpec) -> Self {
        Self { ctx, app }
    }

    /// Plans and applies in one go.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any cloud call, or the first
    /// probe or provider error.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let plan = self.plan().await?;
        self.apply(plan).await
    }

    /// Checks the spec without touching the cloud.
    fn resolve(&self) -> Result<Resolved> {
        let app = self.app;
        let health_check = match &app.load_balancer {
            Some(lb) => {
                if app.port.is_none() {
                    return Err(ConfigError::PortRequired {
                        app: app.app_name.clone(),
                    }
                    .into());
                }
                Some(health_check_params(&lb.health_check)?)
            }
            None => None,
        };
        Ok(Resolved {
            cpu: cpu_units(app.cpu)?,
            memory_mib: memory_mib(&app.memory)?,
            port: app.port,
            health_check,
        })
    }

    fn chain(&self, resolved: &Resolved) -> Option<LoadBalancerChain<'a>> {
        let spec = self.app.load_balancer.as_ref()?;
        let port = resolved.port?;
        let health_check = resolved.health_check.clone()?;
        Some(LoadBalancerChain::new(self.ctx, self.app, spec, port, health_check))
    }

    /// Probes the application's resources and decides what to do.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (missing port, bad units, cluster not
    /// active, ambiguous listener) or a probe error.
    pub async fn plan(&self) -> Result<ReconciliationPlan> {
        let resolved = self.resolve()?;
        let cloud = self.ctx.cloud;
        let naming = &self.ctx.naming;
        let app = self.app;

        info!("Planning deployment of {}", app.app_name);
        let mut plan = ReconciliationPlan::new(
            format!("app {}", app.app_name),
            ConfigHasher::new().hash_app(app),
        );

        let cluster_name = naming.cluster(&app.cluster_name);
        let active = cloud
            .scheduler
            .get_cluster(&cluster_name)
            .await
            .for_resource(ResourceKind::Cluster, &cluster_name)?
            .is_some_and(|c| c.is_active());
        if !active {
            return Err(ConfigError::ClusterNotReady {
                cluster: app.cluster_name.clone(),
            }
            .into());
        }

        let repo_name = naming.repository(&app.app_name);
        let repository = cloud
            .registry
            .get_repository(&repo_name)
            .await
            .for_resource(ResourceKind::Repository, &repo_name)?;
        match repository {
            Some(r) => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::Repository, &repo_name, r.uri),
                "exists",
            ),
            None => plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::Repository, &repo_name),
                "not found",
            ),
        }

        let family = naming.task_family(&app.app_name);
        plan.push(
            Action::Create,
            ResourceRef::absent(ResourceKind::TaskDefinition, &family),
            "new revision on every deploy",
        );

        let service_name = naming.service(&app.app_name);
        let service = cloud
            .scheduler
            .get_service(&cluster_name, &service_name)
            .await
            .for_resource(ResourceKind::Service, &service_name)?;
        match service {
            Some(s) if s.is_active() => {
                if let Some(chain) = self.chain(&resolved) {
                    self.plan_health_check(&mut plan, &chain, &resolved).await?;
                }
                plan.push(
                    Action::Update,
                    ResourceRef::present(ResourceKind::Service, &service_name, s.arn),
                    "active",
                );
            }
            Some(s) if s.is_draining() => {
                if let Some(chain) = self.chain(&resolved) {
                    chain.plan(&mut plan).await?;
                }
                plan.push(
                    Action::Create,
                    ResourceRef::present(ResourceKind::Service, &service_name, s.arn),
                    "previous service is draining",
                );
            }
            _ => {
                if let Some(chain) = self.chain(&resolved) {
                    chain.plan(&mut plan).await?;
                }
                plan.push(
                    Action::Create,
                    ResourceRef::absent(ResourceKind::Service, &service_name),
                    "not found",
                );
            }
        }

        debug!("Deployment plan has {} actions", plan.actions.len());
        Ok(plan)
    }

    async fn plan_health_check(
        &self,
        plan: &mut ReconciliationPlan,
        chain: &LoadBalancerChain<'a>,
        resolved: &Resolved,
    ) -> Result<()> {
        let tg_name = chain.target_group_name();
        let target_group = self
            .ctx
            .cloud
            .load_balancing
            .get_target_group(&tg_name)
            .await
            .for_resource(ResourceKind::TargetGroup, &tg_name)?;
        if let Some(tg) = target_group {
            if resolved.health_check.as_ref() != Some(&tg.health_check) {
                plan.push(
                    Action::Update,
                    ResourceRef::present(ResourceKind::TargetGroup, &tg_name, tg.arn),
                    "health check changed",
                );
            }
        }
        Ok(())
    }

    /// Applies a plan computed by [`Self::plan`].
    ///
    /// # Errors
    ///
    /// Returns the first provider error; nothing after it runs.
    pub async fn apply(&self, plan: ReconciliationPlan) -> Result<ReconcileReport> {
        info!("Applying {}", plan.subject);
        let resolved = self.resolve()?;
        let ctx = self.ctx;
        let app = self.app;
        let mut outputs = BTreeMap::new();

        let repository_uri = self.apply_repository(&plan).await?;
        let image = self.resolve_image(&repository_uri).await?;
        outputs.insert(String::from("image"), image.clone());

        let task_definition = self.register_task_definition(&resolved, image).await?;
        outputs.insert(String::from("task_definition"), task_definition.clone());

        let service_name = ctx.naming.service(&app.app_name);
        let step = plan.step(ResourceKind::Service, &service_name)?;
        if step.action == Action::Update {
            self.update_service(&plan, &resolved, task_definition).await?;
        } else {
            if step.resource.is_present() {
                self.wait_for_inactive(&service_name).await?;
            }
            let binding = match self.chain(&resolved) {
                Some(chain) => {
                    let outcome = chain.apply(&plan).await?;
                    outputs.insert(String::from("load_balancer"), outcome.dns_name);
                    Some(ServiceLoadBalancer {
                        target_group_arn: outcome.target_group_arn,
                        container_name: app.app_name.clone(),
                        container_port: resolved.port.unwrap_or_default(),
                    })
                }
                None => None,
            };
            self.create_service(task_definition, binding).await?;
        }

        outputs.insert(String::from("service"), service_name);
        info!("Application {} deployed", app.app_name);
        Ok(ReconcileReport::new(plan, outputs))
    }

    async fn apply_repository(&self, plan: &ReconciliationPlan) -> Result<String> {
        let ctx = self.ctx;
        let name = ctx.naming.repository(&self.app.app_name);
        let step = plan.step(ResourceKind::Repository, &name)?;
        if step.action != Action::Create {
            ctx.emit(ResourceKind::Repository, EventAction::Skipped, &name);
            return existing_id(step);
        }

        let repository = ctx
            .cloud
            .registry
            .create_repository(&name)
            .await
            .for_resource(ResourceKind::Repository, &name)?;
        ctx.emit_detail(ResourceKind::Repository, EventAction::Created, &name, &repository.uri);
        Ok(repository.uri)
    }

    /// Returns the image reference the task definition runs, building and
    /// pushing it first when the app is built from source.
    async fn resolve_image(&self, repository_uri: &str) -> Result<String> {
        let images = &self.ctx.cloud.images;
        let name = self.ctx.naming.repository(&self.app.app_name);
        match &self.app.image {
            ImageSource::Image(image) => Ok(image.clone()),
            ImageSource::Repository { tag } => Ok(format!("{repository_uri}:{tag}")),
            ImageSource::Build { path, tag } => {
                let registry = repository_uri.split('/').next().unwrap_or(repository_uri);
                let reference = format!("{repository_uri}:{tag}");

                info!("Building {} from {}", reference, path);
                images
                    .registry_login(registry)
                    .await
                    .for_resource(ResourceKind::Repository, &name)?;
                let built = images
                    .build_and_tag(path, &reference)
                    .await
                    .for_resource(ResourceKind::Repository, &name)?;
                images
                    .push(&built)
                    .await
                    .for_resource(ResourceKind::Repository, &name)?;
                self.ctx.emit_detail(
                    ResourceKind::Repository,
                    EventAction::Updated,
                    &name,
                    &format!("pushed {built}"),
                );
                Ok(built)
            }
        }
    }

    async fn register_task_definition(&self, resolved: &Resolved, image: String) -> Result<String> {
        let ctx = self.ctx;
        let app = self.app;
        let family = ctx.naming.task_family(&app.app_name);

        let container = ContainerDefinition {
            name: app.app_name.clone(),
            image,
            cpu: resolved.cpu,
            memory_mib: resolved.memory_mib,
            port_mappings: resolved
                .port
                .map(|port| PortMapping {
                    container_port: port,
                    host_port: 0,
                    protocol: String::from("tcp"),
                })
                .into_iter()
                .collect(),
            environment: app.env.clone(),
            log_configuration: app.logging.as_ref().map(|l| LogConfiguration {
                driver: l.driver.clone(),
                options: l.options.clone(),
            }),
        };

        let definition = ctx
            .cloud
            .scheduler
            .register_task_definition(&TaskDefinitionParams {
                family: family.clone(),
                container,
            })
            .await
            .for_resource(ResourceKind::TaskDefinition, &family)?;
        ctx.emit_detail(
            ResourceKind::TaskDefinition,
            EventAction::Created,
            &family,
            &format!("revision {}", definition.revision),
        );
        Ok(definition.arn)
    }

    async fn update_service(
        &self,
        plan: &ReconciliationPlan,
        resolved: &Resolved,
        task_definition: String,
    ) -> Result<()> {
        let ctx = self.ctx;
        let app = self.app;

        let health_update = plan
            .actions
            .iter()
            .find(|a| a.kind == ResourceKind::TargetGroup && a.action == Action::Update);
        if let (Some(step), Some(health_check)) = (health_update, &resolved.health_check) {
            let arn = existing_id(step)?;
            ctx.cloud
                .load_balancing
                .modify_health_check(&arn, health_check)
                .await
                .for_resource(ResourceKind::TargetGroup, &step.resource.name)?;
            ctx.emit_detail(
                ResourceKind::TargetGroup,
                EventAction::Updated,
                &step.resource.name,
                "health check",
            );
        }

        let cluster = ctx.naming.cluster(&app.cluster_name);
        let name = ctx.naming.service(&app.app_name);
        ctx.cloud
            .scheduler
            .update_service(
                &cluster,
                &name,
                &ServiceUpdate {
                    task_definition: Some(task_definition),
                    desired_count: Some(app.unit_count),
                },
            )
            .await
            .for_resource(ResourceKind::Service, &name)?;
        ctx.emit_detail(
            ResourceKind::Service,
            EventAction::Updated,
            &name,
            &format!("{} units", app.unit_count),
        );
        Ok(())
    }

    async fn wait_for_inactive(&self, name: &str) -> Result<()> {
        let ctx = self.ctx;
        let scheduler = &ctx.cloud.scheduler;
        let cluster = ctx.naming.cluster(&self.app.cluster_name);
        let cluster = cluster.as_str();

        ctx.emit_detail(
            ResourceKind::Service,
            EventAction::Waiting,
            name,
            "previous service is draining",
        );
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
                    Some(s) if s.is_draining() || s.is_active() => None,
                    _ => Some(()),
                })
            },
        )
        .await
    }

    async fn create_service(
        &self,
        task_definition: String,
        binding: Option<ServiceLoadBalancer>,
    ) -> Result<()> {
        let ctx = self.ctx;
        let app = self.app;
        let name = ctx.naming.service(&app.app_name);
        let role = binding
            .as_ref()
            .map(|_| ctx.naming.service_role(&app.cluster_name));

        ctx.cloud
            .scheduler
            .create_service(&ServiceParams {
                name: name.clone(),
                cluster: ctx.naming.cluster(&app.cluster_name),
                task_definition,
                desired_count: app.unit_count,
                role,
                load_balancer: binding,
                deployment: DeploymentPolicy::default(),
            })
            .await
            .for_resource(ResourceKind::Service, &name)?;
        ctx.emit_detail(
            ResourceKind::Service,
            EventAction::Created,
            &name,
            &format!("{} units", app.unit_count),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        Cloud, LoadBalancerApi, MockImageBuilder, RegistryApi, RegistryCredentials, SandboxSettings,
        SchedulerApi,
    };
    use crate::error::DeployError;
    use crate::events::RecordingSink;
    use crate::model::ClusterSpec;
    use crate::reconciler::fixtures::{app_spec, cluster_spec, sandbox, sandbox_with};
    use crate::reconciler::ClusterReconciler;
    use crate::retry::WaitPolicies;
    use mockall::Sequence;
    use std::sync::Arc;

    async fn with_cluster(cloud: &Cloud, spec: &ClusterSpec) {
        let sink = RecordingSink::new();
        let ctx = Context::new(cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, spec).reconcile().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_deploy_creates_app_topology() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 2)).await;
        memory.clear_calls();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let app = app_spec("echo", "cluster1");

        let report = DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let creations: Vec<String> = memory
            .creations()
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            creations,
            vec![
                "create_repository",
                "register_task_definition",
                "create_target_group",
                "create_security_group",
                "create_load_balancer",
                "create_listener",
                "create_service",
            ]
        );
        assert!(report.outputs["task_definition"].ends_with("task-definition/echo:1"));
        assert_eq!(report.created, 7);

        let service = memory
            .get_service("ecsdeploy-cluster1", "echo")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.desired_count, 2);
        assert_eq!(service.deployment.maximum_percent, 200);
        assert_eq!(service.deployment.minimum_healthy_percent, 50);
        assert_eq!(service.load_balancers.len(), 1);
        assert_eq!(service.load_balancers[0].container_port, 8080);
        assert_eq!(service.role.as_deref(), Some("ecsdeploy_cluster1_ecs_service_role"));
    }

    #[tokio::test]
    async fn test_second_deploy_updates_service_with_new_revision() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 2)).await;
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let app = app_spec("echo", "cluster1");
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();
        memory.clear_calls();

        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let creations: Vec<String> = memory
            .creations()
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(creations, vec!["register_task_definition"]);
        assert_eq!(memory.count("update_service"), 1);
        assert_eq!(memory.count("modify_health_check"), 0);

        let service = memory
            .get_service("ecsdeploy-cluster1", "echo")
            .await
            .unwrap()
            .unwrap();
        assert!(service.task_definition.ends_with("task-definition/echo:2"));
        assert_eq!(service.desired_count, 2);
    }

    #[tokio::test]
    async fn test_changed_health_check_is_applied_before_update() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 1)).await;
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();
        memory.clear_calls();
        app.load_balancer.as_mut().unwrap().health_check.path = String::from("/health");

        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let ops = memory.operations();
        let modify = ops.iter().position(|o| o == "modify_health_check").unwrap();
        let update = ops.iter().position(|o| o == "update_service").unwrap();
        assert!(modify < update);
        let tg = memory
            .get_target_group("ecsdeploy-echo-tg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tg.health_check.path, "/health");
    }

    #[tokio::test]
    async fn test_load_balancer_without_port_fails_before_any_call() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        app.port = None;

        let err = DeploymentReconciler::new(&ctx, &app)
            .reconcile()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigError::PortRequired { .. })
        ));
        assert!(memory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_memory_fails_before_any_call() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        app.memory = String::from("lots");

        let err = DeploymentReconciler::new(&ctx, &app).plan().await.unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigError::InvalidUnit { .. })
        ));
        assert!(memory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_is_reported() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let app = app_spec("echo", "cluster1");

        let err = DeploymentReconciler::new(&ctx, &app).plan().await.unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigError::ClusterNotReady { .. })
        ));
        assert!(memory.creations().is_empty());
    }

    #[tokio::test]
    async fn test_app_without_load_balancer_has_no_chain() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 1)).await;
        memory.clear_calls();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("worker", "cluster1");
        app.load_balancer = None;
        app.port = None;

        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        assert_eq!(memory.count("create_target_group"), 0);
        assert_eq!(memory.count("create_load_balancer"), 0);
        let service = memory
            .get_service("ecsdeploy-cluster1", "worker")
            .await
            .unwrap()
            .unwrap();
        assert!(service.load_balancers.is_empty());
        assert!(service.role.is_none());
    }

    #[tokio::test]
    async fn test_draining_service_is_waited_out_and_recreated() {
        let (memory, cloud) = sandbox_with(SandboxSettings {
            instance_drain_polls: 0,
            service_drain_polls: 2,
            group_delete_polls: 0,
        });
        with_cluster(&cloud, &cluster_spec("cluster1", 1)).await;
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("worker", "cluster1");
        app.load_balancer = None;
        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let update = ServiceUpdate {
            task_definition: None,
            desired_count: Some(0),
        };
        memory
            .update_service("ecsdeploy-cluster1", "worker", &update)
            .await
            .unwrap();
        memory.get_service("ecsdeploy-cluster1", "worker").await.unwrap();
        memory.get_service("ecsdeploy-cluster1", "worker").await.unwrap();
        memory.get_service("ecsdeploy-cluster1", "worker").await.unwrap();
        memory
            .delete_service("ecsdeploy-cluster1", "worker")
            .await
            .unwrap();
        memory.clear_calls();

        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        assert_eq!(memory.count("create_service"), 1);
        assert_eq!(memory.count("update_service"), 0);
        let service = memory
            .get_service("ecsdeploy-cluster1", "worker")
            .await
            .unwrap()
            .unwrap();
        assert!(service.is_active());
    }

    #[tokio::test]
    async fn test_built_image_is_pushed_before_registration() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 1)).await;

        let mut images = MockImageBuilder::new();
        let mut seq = Sequence::new();
        images
            .expect_registry_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|registry| {
                Ok(RegistryCredentials {
                    endpoint: registry.to_string(),
                    username: String::from("AWS"),
                    password: String::from("token"),
                })
            });
        images
            .expect_build_and_tag()
            .withf(|path, image| path.to_string() == "./app" && image.ends_with("/ecsdeploy/echo:v1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, image| Ok(image.to_string()));
        images
            .expect_push()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let cloud = cloud.with_images(Arc::new(images));

        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        app.image = ImageSource::Build {
            path: String::from("./app"),
            tag: String::from("v1"),
        };

        let report = DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let repository = memory.get_repository("ecsdeploy/echo").await.unwrap().unwrap();
        assert_eq!(report.outputs["image"], format!("{}:v1", repository.uri));
        let definition = memory.snapshot().task_definitions["echo"][0].clone();
        assert_eq!(definition.container.image, format!("{}:v1", repository.uri));
    }

    #[tokio::test]
    async fn test_repository_image_uses_tag() {
        let (memory, cloud) = sandbox();
        with_cluster(&cloud, &cluster_spec("cluster1", 1)).await;
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        app.image = ImageSource::Repository {
            tag: String::from("stable"),
        };

        DeploymentReconciler::new(&ctx, &app).reconcile().await.unwrap();

        let definition = memory.snapshot().task_definitions["echo"][0].clone();
        assert!(definition.container.image.ends_with("/ecsdeploy/echo:stable"));
        assert_eq!(definition.container.cpu, 512);
        assert_eq!(definition.container.memory_mib, 512);
        assert_eq!(definition.container.port_mappings[0].host_port, 0);
        assert_eq!(definition.container.environment["MODE"], "echo");
    }
}

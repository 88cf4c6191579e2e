//! Load balancer chain builder.
//!
//! Resolves or builds the target group, load balancer security group,
//! load balancer and listener an application is exposed through. An
//! existing load balancer is shared: only a target group and a listener
//! are added to it. The cluster instance security group is opened to the
//! load balancer's security groups.

use tracing::{debug, info};

use crate::cloud::{
    HealthCheckParams, IngressRule, IngressSource, ListenerParams, LoadBalancerParams,
    ResourceKind, ResourceRef, SecurityGroup, SecurityGroupParams, TargetGroupParams,
};
use crate::config::units::duration_secs;
use crate::error::{ConfigError, DeployError, ProviderResultExt, ReconcileError, Result};
use crate::events::EventAction;
use crate::model::{AppSpec, HealthCheckSpec, LoadBalancerSpec, SecurityGroupSource};
use crate::planner::{Action, ReconciliationPlan};
use crate::tagging::OwnershipTag;

use super::{existing_id, Context};

/// Converts a health check from user units to provider units.
///
/// # Errors
///
/// Returns a configuration error if the interval or timeout is not a
/// valid time expression.
pub fn health_check_params(spec: &HealthCheckSpec) -> std::result::Result<HealthCheckParams, ConfigError> {
    Ok(HealthCheckParams {
        path: spec.path.clone(),
        matcher: spec.status.clone(),
        interval_secs: duration_secs(&spec.interval)?,
        timeout_secs: duration_secs(&spec.timeout)?,
        healthy_threshold: spec.healthy_limit,
        unhealthy_threshold: spec.unhealthy_limit,
    })
}

/// What the chain hands back to the service create step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Target group the service registers its tasks in.
    pub target_group_arn: String,
    /// Public DNS name of the load balancer.
    pub dns_name: String,
}

/// Plans and builds the load balancer resources of one application.
#[derive(Debug)]
pub struct LoadBalancerChain<'a> {
    ctx: &'a Context<'a>,
    app: &'a AppSpec,
    spec: &'a LoadBalancerSpec,
    container_port: u16,
    health_check: HealthCheckParams,
}

impl<'a> LoadBalancerChain<'a> {
    /// Creates a chain builder.
    #[must_use]
    pub const fn new(
        ctx: &'a Context<'a>,
        app: &'a AppSpec,
        spec: &'a LoadBalancerSpec,
        container_port: u16,
        health_check: HealthCheckParams,
    ) -> Self {
        Self {
            ctx,
            app,
            spec,
            container_port,
            health_check,
        }
    }

    /// Name of the load balancer, user-supplied or derived.
    #[must_use]
    pub fn load_balancer_name(&self) -> String {
        self.spec
            .name
            .clone()
            .unwrap_or_else(|| self.ctx.naming.load_balancer(&self.app.app_name))
    }

    /// Name of the application's target group.
    #[must_use]
    pub fn target_group_name(&self) -> String {
        self.ctx.naming.target_group(&self.app.app_name)
    }

    fn listener_name(&self, port: u16) -> String {
        format!("{}:{port}", self.load_balancer_name())
    }

    fn instance_group_name(&self) -> String {
        self.ctx
            .naming
            .instance_security_group(&self.app.cluster_name)
    }

    /// Appends the chain's decisions to a plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AmbiguousListener`] when the load balancer and
    /// the target group both exist but no listener links them, or a probe
    /// error.
    pub async fn plan(&self, plan: &mut ReconciliationPlan) -> Result<()> {
        let lbs = &self.ctx.cloud.load_balancing;
        let lb_name = self.load_balancer_name();
        let tg_name = self.target_group_name();

        let load_balancer = lbs
            .get_load_balancer(&lb_name)
            .await
            .for_resource(ResourceKind::LoadBalancer, &lb_name)?;
        let target_group = lbs
            .get_target_group(&tg_name)
            .await
            .for_resource(ResourceKind::TargetGroup, &tg_name)?;

        let mut source_groups: Vec<String> = vec![];

        if let Some(lb) = load_balancer {
            debug!("Load balancer {} exists, sharing it", lb_name);
            match target_group {
                Some(tg) => {
                    let listeners = lbs
                        .list_listeners(&lb.arn)
                        .await
                        .for_resource(ResourceKind::Listener, &lb_name)?;
                    let listener = listeners
                        .into_iter()
                        .find(|l| l.target_group_arn == tg.arn)
                        .ok_or_else(|| ConfigError::AmbiguousListener {
                            load_balancer: lb_name.clone(),
                            target_group: tg_name.clone(),
                        })?;
                    plan.push(
                        Action::Skip,
                        ResourceRef::present(ResourceKind::TargetGroup, &tg_name, tg.arn),
                        "exists",
                    );
                    plan.push(
                        Action::Skip,
                        ResourceRef::present(
                            ResourceKind::Listener,
                            self.listener_name(listener.port),
                            listener.arn,
                        ),
                        "forwards to target group",
                    );
                }
                None => {
                    plan.push(
                        Action::Create,
                        ResourceRef::absent(ResourceKind::TargetGroup, &tg_name),
                        "not found",
                    );
                    plan.push(
                        Action::Create,
                        ResourceRef::absent(ResourceKind::Listener, self.listener_name(self.spec.port)),
                        "shared load balancer has no listener for this app",
                    );
                }
            }
            source_groups.clone_from(&lb.security_groups);
            plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::LoadBalancer, &lb_name, lb.arn).with_tags(lb.tags),
                "exists",
            );
        } else {
            match target_group {
                Some(tg) => plan.push(
                    Action::Skip,
                    ResourceRef::present(ResourceKind::TargetGroup, &tg_name, tg.arn),
                    "exists",
                ),
                None => plan.push(
                    Action::Create,
                    ResourceRef::absent(ResourceKind::TargetGroup, &tg_name),
                    "not found",
                ),
            }

            match self.resolve_security_group().await? {
                Some(group) => {
                    source_groups.push(group.id.clone());
                    plan.push(
                        Action::Skip,
                        ResourceRef::present(ResourceKind::SecurityGroup, &group.name, group.id)
                            .with_tags(group.tags),
                        "exists",
                    );
                }
                None => plan.push(
                    Action::Create,
                    ResourceRef::absent(
                        ResourceKind::SecurityGroup,
                        self.ctx.naming.load_balancer_security_group(&self.app.app_name),
                    ),
                    "not found",
                ),
            }

            plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::LoadBalancer, &lb_name),
                "not found",
            );
            plan.push(
                Action::Create,
                ResourceRef::absent(ResourceKind::Listener, self.listener_name(self.spec.port)),
                "new load balancer",
            );
        }

        self.plan_instance_ingress(plan, &source_groups).await
    }

    /// Looks up the security group the load balancer should use.
    ///
    /// A user-supplied id or name wins; otherwise a derived group left over
    /// from an earlier run is reused.
    async fn resolve_security_group(&self) -> Result<Option<SecurityGroup>> {
        let network = &self.ctx.cloud.network;
        if let Some(reference) = &self.spec.security_group {
            let found = match SecurityGroupSource::parse(reference) {
                SecurityGroupSource::GroupId(id) => network
                    .get_security_group(&id)
                    .await
                    .for_resource(ResourceKind::SecurityGroup, &id)?,
                SecurityGroupSource::Name(name) => network
                    .find_security_group(&name)
                    .await
                    .for_resource(ResourceKind::SecurityGroup, &name)?,
                SecurityGroupSource::Cidr(_) => None,
            };
            if found.is_some() {
                return Ok(found);
            }
            debug!("Security group {} did not resolve, creating one", reference);
        }

        let derived = self.ctx.naming.load_balancer_security_group(&self.app.app_name);
        network
            .find_security_group(&derived)
            .await
            .for_resource(ResourceKind::SecurityGroup, &derived)
    }

    async fn plan_instance_ingress(
        &self,
        plan: &mut ReconciliationPlan,
        source_groups: &[String],
    ) -> Result<()> {
        let name = self.instance_group_name();
        let group = self
            .ctx
            .cloud
            .network
            .find_security_group(&name)
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;

        match group {
            None => plan.push(
                Action::Skip,
                ResourceRef::absent(ResourceKind::SecurityGroup, &name),
                "instance security group not found",
            ),
            Some(g) if plan_creates(plan, ResourceKind::SecurityGroup) => plan.push(
                Action::Update,
                ResourceRef::present(ResourceKind::SecurityGroup, &name, g.id),
                "allow traffic from new load balancer security group",
            ),
            Some(g) if source_groups.iter().all(|s| g.allows_group(s)) => plan.push(
                Action::Skip,
                ResourceRef::present(ResourceKind::SecurityGroup, &name, g.id),
                "already allows load balancer traffic",
            ),
            Some(g) => plan.push(
                Action::Update,
                ResourceRef::present(ResourceKind::SecurityGroup, &name, g.id),
                "allow traffic from load balancer security group",
            ),
        }
        Ok(())
    }

    /// Builds whatever the plan says is missing.
    ///
    /// # Errors
    ///
    /// Returns the first provider error.
    pub async fn apply(&self, plan: &ReconciliationPlan) -> Result<ChainOutcome> {
        let ctx = self.ctx;
        let lbs = &ctx.cloud.load_balancing;
        let lb_name = self.load_balancer_name();
        let network_id = self.target_network().await?;

        let target_group_arn = self.apply_target_group(plan, &network_id).await?;

        let lb_step = plan.step(ResourceKind::LoadBalancer, &lb_name)?;
        let (load_balancer_arn, dns_name, source_groups) = if lb_step.action == Action::Create {
            let group_id = self.apply_security_group(plan, &network_id).await?;
            let (_, subnets) = ctx.network(Some(&network_id)).await?;
            let lb = lbs
                .create_load_balancer(&LoadBalancerParams {
                    name: lb_name.clone(),
                    subnets,
                    security_groups: vec![group_id],
                })
                .await
                .for_resource(ResourceKind::LoadBalancer, &lb_name)?;
            lbs.tag_load_balancer(&lb.arn, &OwnershipTag::now().to_tags())
                .await
                .for_resource(ResourceKind::LoadBalancer, &lb_name)?;
            ctx.emit_detail(ResourceKind::LoadBalancer, EventAction::Created, &lb_name, &lb.dns_name);
            (lb.arn, lb.dns_name, lb.security_groups)
        } else {
            let lb = lbs
                .get_load_balancer(&lb_name)
                .await
                .for_resource(ResourceKind::LoadBalancer, &lb_name)?
                .ok_or_else(|| {
                    DeployError::internal(format!(
                        "load balancer {lb_name} disappeared during the run"
                    ))
                })?;
            ctx.emit(ResourceKind::LoadBalancer, EventAction::Skipped, &lb_name);
            (lb.arn, lb.dns_name, lb.security_groups)
        };

        let listener_name = plan
            .actions
            .iter()
            .find(|a| a.kind == ResourceKind::Listener)
            .map(|a| a.resource.name.clone())
            .unwrap_or_else(|| self.listener_name(self.spec.port));
        let listener_step = plan.step(ResourceKind::Listener, &listener_name)?;
        if listener_step.action == Action::Create {
            let (protocol, certificate) = match &self.spec.certificate {
                Some(cert) => ("HTTPS", Some(cert.clone())),
                None => ("HTTP", None),
            };
            lbs.create_listener(&ListenerParams {
                load_balancer_arn,
                port: self.spec.port,
                protocol: protocol.to_string(),
                certificate,
                target_group_arn: target_group_arn.clone(),
            })
            .await
            .for_resource(ResourceKind::Listener, &listener_name)?;
            ctx.emit_detail(ResourceKind::Listener, EventAction::Created, &listener_name, protocol);
        } else {
            ctx.emit(ResourceKind::Listener, EventAction::Skipped, &listener_name);
        }

        self.apply_instance_ingress(plan, &source_groups).await?;

        info!("Load balancer {} serves {}", lb_name, self.app.app_name);
        Ok(ChainOutcome {
            target_group_arn,
            dns_name,
        })
    }

    async fn apply_target_group(&self, plan: &ReconciliationPlan, network_id: &str) -> Result<String> {
        let ctx = self.ctx;
        let name = self.target_group_name();
        let step = plan.step(ResourceKind::TargetGroup, &name)?;
        if step.action != Action::Create {
            ctx.emit(ResourceKind::TargetGroup, EventAction::Skipped, &name);
            return existing_id(step);
        }

        let target_group = ctx
            .cloud
            .load_balancing
            .create_target_group(&TargetGroupParams {
                name: name.clone(),
                port: self.container_port,
                protocol: String::from("HTTP"),
                network_id: network_id.to_string(),
                health_check: self.health_check.clone(),
            })
            .await
            .for_resource(ResourceKind::TargetGroup, &name)?;
        ctx.emit(ResourceKind::TargetGroup, EventAction::Created, &name);
        Ok(target_group.arn)
    }

    async fn apply_security_group(&self, plan: &ReconciliationPlan, network_id: &str) -> Result<String> {
        let ctx = self.ctx;
        let Some(step) = plan.actions.iter().find(|a| {
            a.kind == ResourceKind::SecurityGroup && a.resource.name != self.instance_group_name()
        }) else {
            return Err(ReconcileError::MissingStep {
                kind: ResourceKind::SecurityGroup,
                name: ctx.naming.load_balancer_security_group(&self.app.app_name),
            }
            .into());
        };
        let name = step.resource.name.clone();
        if step.action != Action::Create {
            ctx.emit(ResourceKind::SecurityGroup, EventAction::Skipped, &name);
            return existing_id(step);
        }

        let source = match self
            .spec
            .security_group
            .as_deref()
            .map(SecurityGroupSource::parse)
        {
            Some(SecurityGroupSource::Cidr(cidr)) => cidr,
            _ => self.spec.ingress_source.clone(),
        };

        let network = &ctx.cloud.network;
        let group = network
            .create_security_group(&SecurityGroupParams {
                name: name.clone(),
                description: format!("Load balancer of {}", self.app.app_name),
                network_id: network_id.to_string(),
            })
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        network
            .authorize_ingress(&group.id, &IngressRule::tcp(self.spec.port, IngressSource::Cidr(source)))
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        network
            .tag_security_group(&group.id, &OwnershipTag::now().to_tags())
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        ctx.emit_detail(ResourceKind::SecurityGroup, EventAction::Created, &name, &group.id);
        Ok(group.id)
    }

    async fn apply_instance_ingress(
        &self,
        plan: &ReconciliationPlan,
        source_groups: &[String],
    ) -> Result<()> {
        let ctx = self.ctx;
        let name = self.instance_group_name();
        let step = plan.step(ResourceKind::SecurityGroup, &name)?;
        if step.action != Action::Update {
            return Ok(());
        }

        let group_id = existing_id(step)?;
        let network = &ctx.cloud.network;
        let Some(group) = network
            .get_security_group(&group_id)
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?
        else {
            return Ok(());
        };
        for source in source_groups {
            if group.allows_group(source) {
                continue;
            }
            network
                .authorize_ingress(
                    &group_id,
                    &IngressRule::tcp_range(0, u16::MAX, IngressSource::Group(source.clone())),
                )
                .await
                .for_resource(ResourceKind::SecurityGroup, &name)?;
            ctx.emit_detail(
                ResourceKind::SecurityGroup,
                EventAction::Updated,
                &name,
                &format!("allowed traffic from {source}"),
            );
        }
        Ok(())
    }

    /// Network the target group and a new load balancer live in: the one
    /// holding the cluster instances, else the default network.
    async fn target_network(&self) -> Result<String> {
        let name = self.instance_group_name();
        let group = self
            .ctx
            .cloud
            .network
            .find_security_group(&name)
            .await
            .for_resource(ResourceKind::SecurityGroup, &name)?;
        match group {
            Some(g) => Ok(g.network_id),
            None => Ok(self.ctx.network(None).await?.0),
        }
    }
}

fn plan_creates(plan: &ReconciliationPlan, kind: ResourceKind) -> bool {
    plan.actions
        .iter()
        .any(|a| a.kind == kind && a.action == Action::Create)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{LoadBalancerApi, NetworkApi, DEFAULT_NETWORK};
    use crate::events::RecordingSink;
    use crate::reconciler::fixtures::{app_spec, cluster_spec, sandbox};
    use crate::reconciler::ClusterReconciler;
    use crate::retry::WaitPolicies;

    fn chain<'a>(ctx: &'a Context<'a>, app: &'a AppSpec) -> LoadBalancerChain<'a> {
        let spec = app.load_balancer.as_ref().unwrap();
        LoadBalancerChain::new(
            ctx,
            app,
            spec,
            app.port.unwrap(),
            health_check_params(&spec.health_check).unwrap(),
        )
    }

    async fn shared_load_balancer(memory: &crate::cloud::MemoryCloud) -> crate::cloud::LoadBalancer {
        memory
            .create_load_balancer(&LoadBalancerParams {
                name: String::from("shared-lb"),
                subnets: vec![String::from("subnet-sandbox-a")],
                security_groups: vec![],
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_health_check_units_are_converted() {
        let mut spec = HealthCheckSpec::default();
        spec.interval = String::from("1m");
        spec.timeout = String::from("500ms");

        let params = health_check_params(&spec).unwrap();

        assert_eq!(params.interval_secs, 60);
        assert_eq!(params.timeout_secs, 1);
        assert_eq!(params.matcher, "200-299");
    }

    #[tokio::test]
    async fn test_new_chain_creates_everything() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        ClusterReconciler::new(&ctx, &cluster_spec("cluster1", 1))
            .reconcile()
            .await
            .unwrap();
        memory.clear_calls();
        let app = app_spec("echo", "cluster1");
        let chain = chain(&ctx, &app);

        let mut plan = ReconciliationPlan::new("app echo", "");
        chain.plan(&mut plan).await.unwrap();
        let outcome = chain.apply(&plan).await.unwrap();

        let creations: Vec<String> = memory
            .creations()
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            creations,
            vec![
                "create_target_group",
                "create_security_group",
                "create_load_balancer",
                "create_listener",
            ]
        );
        assert!(outcome.dns_name.contains("ecsdeploy-echo-lb"));

        let lb = memory
            .get_load_balancer("ecsdeploy-echo-lb")
            .await
            .unwrap()
            .unwrap();
        assert!(OwnershipTag::is_owned(&lb.tags));
        let instance_group = memory
            .find_security_group("ecsdeploy_cluster1_instance_sg")
            .await
            .unwrap()
            .unwrap();
        assert!(instance_group.allows_group(&lb.security_groups[0]));
    }

    #[tokio::test]
    async fn test_shared_load_balancer_gets_target_group_and_listener() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        shared_load_balancer(&memory).await;
        memory.clear_calls();
        let mut app = app_spec("echo", "cluster1");
        app.load_balancer.as_mut().unwrap().name = Some(String::from("shared-lb"));
        let chain = chain(&ctx, &app);

        let mut plan = ReconciliationPlan::new("app echo", "");
        chain.plan(&mut plan).await.unwrap();
        chain.apply(&plan).await.unwrap();

        assert_eq!(memory.count("create_load_balancer"), 0);
        assert_eq!(memory.count("create_security_group"), 0);
        assert_eq!(memory.count("create_target_group"), 1);
        assert_eq!(memory.count("create_listener"), 1);
    }

    #[tokio::test]
    async fn test_target_group_without_listener_is_ambiguous() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        shared_load_balancer(&memory).await;
        memory
            .create_target_group(&TargetGroupParams {
                name: String::from("ecsdeploy-echo-tg"),
                port: 8080,
                protocol: String::from("HTTP"),
                network_id: DEFAULT_NETWORK.to_string(),
                health_check: health_check_params(&HealthCheckSpec::default()).unwrap(),
            })
            .await
            .unwrap();
        memory.clear_calls();
        let mut app = app_spec("echo", "cluster1");
        app.load_balancer.as_mut().unwrap().name = Some(String::from("shared-lb"));

        let mut plan = ReconciliationPlan::new("app echo", "");
        let err = chain(&ctx, &app).plan(&mut plan).await.unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigError::AmbiguousListener { .. })
        ));
        assert!(memory.creations().is_empty());
    }

    #[tokio::test]
    async fn test_user_security_group_is_reused_untagged() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let existing = memory
            .create_security_group(&SecurityGroupParams {
                name: String::from("shared-web"),
                description: String::from("web"),
                network_id: DEFAULT_NETWORK.to_string(),
            })
            .await
            .unwrap();
        memory.clear_calls();
        let mut app = app_spec("echo", "cluster1");
        app.load_balancer.as_mut().unwrap().security_group = Some(String::from("shared-web"));
        let chain = chain(&ctx, &app);

        let mut plan = ReconciliationPlan::new("app echo", "");
        chain.plan(&mut plan).await.unwrap();
        chain.apply(&plan).await.unwrap();

        assert_eq!(memory.count("create_security_group"), 0);
        assert_eq!(memory.count("tag_security_group"), 0);
        let lb = memory
            .get_load_balancer("ecsdeploy-echo-lb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lb.security_groups, vec![existing.id]);
    }

    #[tokio::test]
    async fn test_cidr_reference_becomes_ingress_source() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        app.load_balancer.as_mut().unwrap().security_group = Some(String::from("10.0.0.0/16"));
        let chain = chain(&ctx, &app);

        let mut plan = ReconciliationPlan::new("app echo", "");
        chain.plan(&mut plan).await.unwrap();
        chain.apply(&plan).await.unwrap();

        let group = memory
            .find_security_group("ecsdeploy_echo_lb_sg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            group.ingress,
            vec![IngressRule::tcp(80, IngressSource::Cidr(String::from("10.0.0.0/16")))]
        );
    }

    #[tokio::test]
    async fn test_certificate_makes_https_listener() {
        let (memory, cloud) = sandbox();
        let sink = RecordingSink::new();
        let ctx = Context::new(&cloud, &sink).with_waits(WaitPolicies::immediate());
        let mut app = app_spec("echo", "cluster1");
        let lb_spec = app.load_balancer.as_mut().unwrap();
        lb_spec.port = 443;
        lb_spec.certificate = Some(String::from("arn:aws:acm:cert/1"));
        let chain = chain(&ctx, &app);

        let mut plan = ReconciliationPlan::new("app echo", "");
        chain.plan(&mut plan).await.unwrap();
        chain.apply(&plan).await.unwrap();

        let lb = memory
            .get_load_balancer("ecsdeploy-echo-lb")
            .await
            .unwrap()
            .unwrap();
        let listeners = memory.list_listeners(&lb.arn).await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].protocol, "HTTPS");
        assert_eq!(listeners[0].port, 443);
        assert_eq!(listeners[0].certificate.as_deref(), Some("arn:aws:acm:cert/1"));
    }
}

//! Reconciliation and teardown engines.
//!
//! Each engine works in two phases. `plan` probes the cloud for every
//! resource of its topology, in dependency order, and records a
//! [`ReconciliationPlan`]. `apply` walks the plan in the same order and
//! performs the mutating calls, reading identifiers produced by earlier
//! steps. Creation is all-or-nothing; teardown can be told to continue
//! past failures.

mod cluster;
mod cluster_teardown;
mod deployment;
mod deployment_teardown;
mod load_balancer;

#[cfg(test)]
pub(crate) mod fixtures;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::cloud::{Cloud, ResourceKind};
use crate::error::{DeployError, ProviderResultExt, Result};
use crate::events::{EventAction, EventSink, LifecycleEvent};
use crate::naming::Naming;
use crate::planner::{Action, PlannedAction, ReconciliationPlan};
use crate::retry::WaitPolicies;

pub use cluster::{
    ClusterReconciler, INSTANCE_POLICY_ARN, INSTANCE_TRUST_POLICY, MANAGEMENT_PORT,
    SERVICE_POLICY_ARN, SERVICE_TRUST_POLICY,
};
pub use cluster_teardown::ClusterTeardown;
pub use deployment::DeploymentReconciler;
pub use deployment_teardown::DeploymentTeardown;
pub use load_balancer::{health_check_params, ChainOutcome, LoadBalancerChain};

/// Everything an engine needs besides its desired state.
#[derive(Clone)]
pub struct Context<'a> {
    /// Provider services.
    pub cloud: &'a Cloud,
    /// Receiver of lifecycle events.
    pub sink: &'a dyn EventSink,
    /// Resource naming scheme.
    pub naming: Naming,
    /// Polling and retry bounds.
    pub waits: WaitPolicies,
}

impl<'a> Context<'a> {
    /// Creates a context with default naming and wait policies.
    #[must_use]
    pub fn new(cloud: &'a Cloud, sink: &'a dyn EventSink) -> Self {
        Self {
            cloud,
            sink,
            naming: Naming::default(),
            waits: WaitPolicies::default(),
        }
    }

    /// Sets the wait policies.
    #[must_use]
    pub const fn with_waits(mut self, waits: WaitPolicies) -> Self {
        self.waits = waits;
        self
    }

    fn emit(&self, kind: ResourceKind, action: EventAction, name: &str) {
        self.sink.emit(&LifecycleEvent::new(kind, action, name));
    }

    fn emit_detail(&self, kind: ResourceKind, action: EventAction, name: &str, detail: &str) {
        self.sink
            .emit(&LifecycleEvent::new(kind, action, name).with_detail(detail));
    }

    /// Resolves the network to use and its subnets.
    async fn network(&self, network_id: Option<&str>) -> Result<(String, Vec<String>)> {
        let network_id = match network_id {
            Some(id) => id.to_string(),
            None => self
                .cloud
                .network
                .default_network()
                .await
                .for_resource(ResourceKind::Network, "default")?,
        };
        let subnets = self
            .cloud
            .network
            .list_subnets(&network_id)
            .await
            .for_resource(ResourceKind::Network, &network_id)?;
        Ok((network_id, subnets))
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("naming", &self.naming)
            .field("waits", &self.waits)
            .finish_non_exhaustive()
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// The plan that was applied.
    pub plan: ReconciliationPlan,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources changed in place.
    pub updated: usize,
    /// Number of resources left alone.
    pub skipped: usize,
    /// Identifiers worth showing the user, e.g. the load balancer DNS name.
    pub outputs: BTreeMap<String, String>,
}

impl ReconcileReport {
    fn new(plan: ReconciliationPlan, outputs: BTreeMap<String, String>) -> Self {
        Self {
            created: plan.count(Action::Create),
            updated: plan.count(Action::Update),
            skipped: plan.count(Action::Skip),
            plan,
            outputs,
        }
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reconciliation of {} successful:", self.plan.subject)?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Unchanged: {}", self.skipped)?;
        for (key, value) in &self.outputs {
            writeln!(f, "  {key}: {value}")?;
        }
        Ok(())
    }
}

/// A resource teardown could not delete.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// The error, rendered.
    pub error: String,
}

/// Result of a teardown run.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    /// The plan that was applied.
    pub plan: ReconciliationPlan,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources already absent or not owned.
    pub skipped: usize,
    /// Failures tolerated in continue-on-error mode.
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    fn new(plan: ReconciliationPlan) -> Self {
        Self {
            skipped: plan.count(Action::Skip),
            plan,
            deleted: 0,
            failures: vec![],
        }
    }

    /// Returns true if every planned deletion succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success() { "successful" } else { "incomplete" };
        writeln!(f, "Teardown of {} {status}:", self.plan.subject)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;
        if !self.failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in &self.failures {
                writeln!(f, "    - {} '{}': {}", failure.kind, failure.name, failure.error)?;
            }
        }
        Ok(())
    }
}

/// Runs one deletion step, recording the outcome in the report.
///
/// With `continue_on_error` the failure is recorded and `Ok` returned so the
/// caller moves on; otherwise the error is returned.
fn settle_deletion(
    ctx: &Context<'_>,
    report: &mut TeardownReport,
    kind: ResourceKind,
    name: &str,
    result: Result<()>,
    continue_on_error: bool,
) -> Result<()> {
    match result {
        Ok(()) => {
            ctx.emit(kind, EventAction::Deleted, name);
            report.deleted += 1;
            Ok(())
        }
        Err(e) if continue_on_error => {
            ctx.emit_detail(kind, EventAction::Failed, name, &e.to_string());
            report.failures.push(TeardownFailure {
                kind,
                name: name.to_string(),
                error: e.to_string(),
            });
            Ok(())
        }
        Err(e) => {
            ctx.emit_detail(kind, EventAction::Failed, name, &e.to_string());
            Err(e)
        }
    }
}

/// Returns the identifier a plan recorded for an existing resource.
fn existing_id(step: &PlannedAction) -> Result<String> {
    step.resource.identifier.clone().ok_or_else(|| {
        DeployError::internal(format!(
            "{} '{}' was planned as existing but has no identifier",
            step.kind, step.resource.name
        ))
    })
}

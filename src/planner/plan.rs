//! Reconciliation plan types.
//!
//! A plan is the ordered list of decisions a reconciler or teardown
//! orchestrator computed by probing the cloud. It is built once per run
//! and applied in order.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cloud::{ResourceKind, ResourceRef};
use crate::error::{ReconcileError, Result};

/// Decision taken for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create the resource.
    Create,
    /// Change the resource in place.
    Update,
    /// Leave the resource alone.
    Skip,
    /// Delete the resource.
    Delete,
}

/// A single planned decision.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Decision.
    pub action: Action,
    /// Observed state of the resource when the plan was computed.
    pub resource: ResourceRef,
    /// Why the decision was taken.
    pub reason: String,
}

/// A complete, ordered plan.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationPlan {
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// What the plan is for, e.g. `cluster cluster1`.
    pub subject: String,
    /// Fingerprint of the desired state the plan was computed from.
    pub fingerprint: String,
    /// Decisions in execution order.
    pub actions: Vec<PlannedAction>,
}

impl ReconciliationPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(subject: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            subject: subject.into(),
            fingerprint: fingerprint.into(),
            actions: vec![],
        }
    }

    /// Appends a decision.
    pub fn push(&mut self, action: Action, resource: ResourceRef, reason: impl Into<String>) {
        self.actions.push(PlannedAction {
            kind: resource.kind,
            action,
            resource,
            reason: reason.into(),
        });
    }

    /// Finds the decision for a resource.
    #[must_use]
    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&PlannedAction> {
        self.actions
            .iter()
            .find(|a| a.kind == kind && a.resource.name == name)
    }

    /// Returns the decision for a resource the apply phase depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MissingStep`] if the plan has no such decision.
    pub fn step(&self, kind: ResourceKind, name: &str) -> Result<&PlannedAction> {
        self.find(kind, name).ok_or_else(|| {
            ReconcileError::MissingStep {
                kind,
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Counts decisions of one kind.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.actions.iter().filter(|a| a.action == action).count()
    }

    /// Returns true if applying the plan changes anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action != Action::Skip)
    }

    /// Returns true if the plan holds no decisions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the first eight characters of the fingerprint.
    #[must_use]
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint.chars().take(8).collect()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} '{}'", self.action, self.kind, self.resource.name)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Plan for {} [{}] ({} actions):",
            self.subject,
            self.short_fingerprint(),
            self.actions.len()
        )?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
        }
        if !self.has_changes() {
            writeln!(f, "No changes required")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::new("cluster c", "abcdef0123456789");
        plan.push(
            Action::Skip,
            ResourceRef::present(ResourceKind::Role, "role", "arn:role"),
            "exists",
        );
        plan.push(
            Action::Create,
            ResourceRef::absent(ResourceKind::Cluster, "c"),
            "not found",
        );
        plan
    }

    #[test]
    fn test_step_lookup() {
        let plan = plan();

        assert_eq!(
            plan.step(ResourceKind::Cluster, "c").unwrap().action,
            Action::Create
        );
        assert!(plan.step(ResourceKind::Cluster, "other").is_err());
    }

    #[test]
    fn test_counts_and_changes() {
        let plan = plan();

        assert_eq!(plan.count(Action::Skip), 1);
        assert_eq!(plan.count(Action::Create), 1);
        assert!(plan.has_changes());
        assert_eq!(plan.short_fingerprint(), "abcdef01");
    }

    #[test]
    fn test_display_lists_actions() {
        let text = plan().to_string();
        assert!(text.contains("1. skip IAM role 'role'"));
        assert!(text.contains("2. create cluster 'c'"));
    }
}

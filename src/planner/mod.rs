//! Planning types shared by every reconciler.
//!
//! Reconcilers probe the cloud and record one decision per resource in a
//! [`ReconciliationPlan`], which is then applied in order.

mod plan;

pub use plan::{Action, PlannedAction, ReconciliationPlan};

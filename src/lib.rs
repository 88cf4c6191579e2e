// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # ecsdeploy
//!
//! A declarative, idempotent provisioner for container clusters and the
//! applications deployed onto them.
//!
//! ## Overview
//!
//! ecsdeploy turns a small YAML file into a running cluster:
//!
//! - An autoscaling group of container instances with their role, instance
//!   profile, security group and launch configuration
//! - A scheduler cluster those instances join
//! - Per application: an image repository, a task definition, a service
//!   and optionally a load balancer with target group and listener
//!
//! Every run probes what exists, computes a plan, and only creates or
//! updates what is missing or different. Teardown walks the same graph in
//! reverse and only deletes what ecsdeploy created.
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `ecsdeploy.yaml`, turned into
//!    [`model::ClusterSpec`] and [`model::AppSpec`]
//! 2. **Observed State**: Probed through the provider traits in [`cloud`]
//! 3. **Reconcilers**: Plan, then apply, in dependency order
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and unit conversion
//! - [`cloud`]: Provider interfaces and the simulated sandbox backend
//! - [`naming`] and [`tagging`]: Derived resource names and ownership tags
//! - [`planner`]: Plan types
//! - [`reconciler`]: Cluster and deployment reconcilers and teardowns
//! - [`retry`]: Transient-error retries and polling waits
//! - [`events`]: Lifecycle event sinks
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: cluster1
//!   image_id: ami-0c55b159cbfafe1f0
//!   instance_type: t3.small
//!   initial_capacity: 2
//!
//! app:
//!   name: echo
//!   port: 8080
//!   cpu: 0.5
//!   memory: 512m
//!   units: 2
//!   docker:
//!     build_path: ./echo
//!   load_balancer:
//!     port: 80
//!     health_check:
//!       path: /health
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod naming;
pub mod planner;
pub mod reconciler;
pub mod retry;
pub mod tagging;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{Cloud, MemoryCloud, SandboxStore};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{DeployError, Result};
pub use model::{AppSpec, ClusterSpec};
pub use planner::{Action, ReconciliationPlan};
pub use reconciler::{
    ClusterReconciler, ClusterTeardown, Context, DeploymentReconciler, DeploymentTeardown,
    ReconcileReport, TeardownReport,
};

//! Cloud provider interfaces and the simulated backend.
//!
//! The reconcilers only talk to the provider through the traits in
//! [`api`]. A [`Cloud`] bundles one implementation of each so it can be
//! passed around as a single handle.

mod api;
mod sandbox;
mod store;
mod types;

use std::sync::Arc;

pub use api::{
    ComputeApi, IdentityApi, ImageBuilder, LoadBalancerApi, NetworkApi, ProviderResult,
    RegistryApi, SchedulerApi,
};
#[cfg(test)]
pub use api::MockImageBuilder;
pub use sandbox::{CloudCall, MemoryCloud, SandboxSettings, SandboxState, DEFAULT_NETWORK};
pub use store::SandboxStore;
pub use types::*;

/// Handles to every provider service.
#[derive(Clone)]
pub struct Cloud {
    /// Roles and instance profiles.
    pub identity: Arc<dyn IdentityApi>,
    /// Networks and security groups.
    pub network: Arc<dyn NetworkApi>,
    /// Launch configurations and autoscaling groups.
    pub compute: Arc<dyn ComputeApi>,
    /// Clusters, task definitions and services.
    pub scheduler: Arc<dyn SchedulerApi>,
    /// Load balancers, target groups and listeners.
    pub load_balancing: Arc<dyn LoadBalancerApi>,
    /// Image repositories.
    pub registry: Arc<dyn RegistryApi>,
    /// Image build and push.
    pub images: Arc<dyn ImageBuilder>,
}

impl Cloud {
    /// Routes every service to the same simulated cloud.
    #[must_use]
    pub fn from_sandbox(sandbox: &Arc<MemoryCloud>) -> Self {
        Self {
            identity: sandbox.clone(),
            network: sandbox.clone(),
            compute: sandbox.clone(),
            scheduler: sandbox.clone(),
            load_balancing: sandbox.clone(),
            registry: sandbox.clone(),
            images: sandbox.clone(),
        }
    }

    /// Replaces the image builder.
    #[must_use]
    pub fn with_images(mut self, images: Arc<dyn ImageBuilder>) -> Self {
        self.images = images;
        self
    }
}

impl std::fmt::Debug for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloud").finish_non_exhaustive()
    }
}

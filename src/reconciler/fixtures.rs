//! Shared builders for reconciler tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cloud::{Cloud, MemoryCloud, SandboxSettings};
use crate::model::{AppSpec, ClusterSpec, HealthCheckSpec, ImageSource, LoadBalancerSpec, ANYWHERE};

pub fn sandbox() -> (Arc<MemoryCloud>, Cloud) {
    sandbox_with(SandboxSettings::default())
}

pub fn sandbox_with(settings: SandboxSettings) -> (Arc<MemoryCloud>, Cloud) {
    let memory = Arc::new(MemoryCloud::new().with_settings(settings));
    let cloud = Cloud::from_sandbox(&memory);
    (memory, cloud)
}

pub fn cluster_spec(name: &str, capacity: u32) -> ClusterSpec {
    ClusterSpec {
        cluster_name: name.to_string(),
        instance_type: String::from("t2.micro"),
        image_id: String::from("ami-0c5b1d7e"),
        key_pair_name: Some(String::from("ops")),
        initial_capacity: capacity,
        instance_profile_name: None,
        network_id: None,
    }
}

pub fn app_spec(name: &str, cluster: &str) -> AppSpec {
    AppSpec {
        app_name: name.to_string(),
        cluster_name: cluster.to_string(),
        port: Some(8080),
        cpu: 0.5,
        memory: String::from("512m"),
        env: BTreeMap::from([(String::from("MODE"), String::from("echo"))]),
        unit_count: 2,
        image: ImageSource::Image(String::from("hashicorp/http-echo:latest")),
        logging: None,
        load_balancer: Some(load_balancer_spec(80)),
    }
}

pub fn load_balancer_spec(port: u16) -> LoadBalancerSpec {
    LoadBalancerSpec {
        name: None,
        port,
        health_check: HealthCheckSpec::default(),
        security_group: None,
        certificate: None,
        ingress_source: ANYWHERE.to_string(),
    }
}

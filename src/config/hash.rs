//! Desired-state fingerprints.
//!
//! Plans carry a SHA-256 fingerprint of the spec they were computed from,
//! so a printed plan can be matched against the configuration that
//! produced it.

use sha2::{Digest, Sha256};

use crate::model::{AppSpec, ClusterSpec, ImageSource};

/// Hasher for computing desired-state fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Fingerprints a cluster spec.
    #[must_use]
    pub fn hash_cluster(&self, spec: &ClusterSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.cluster_name.as_bytes());
        hasher.update(spec.instance_type.as_bytes());
        hasher.update(spec.image_id.as_bytes());
        update_opt(&mut hasher, spec.key_pair_name.as_deref());
        hasher.update(spec.initial_capacity.to_be_bytes());
        update_opt(&mut hasher, spec.instance_profile_name.as_deref());
        update_opt(&mut hasher, spec.network_id.as_deref());

        hex::encode(hasher.finalize())
    }

    /// Fingerprints an application spec.
    #[must_use]
    pub fn hash_app(&self, spec: &AppSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.app_name.as_bytes());
        hasher.update(spec.cluster_name.as_bytes());
        if let Some(port) = spec.port {
            hasher.update(port.to_be_bytes());
        }
        hasher.update(spec.cpu.to_be_bytes());
        hasher.update(spec.memory.as_bytes());
        hasher.update(spec.unit_count.to_be_bytes());

        // BTreeMap iterates in key order
        for (key, value) in &spec.env {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }

        match &spec.image {
            ImageSource::Image(image) => hasher.update(image.as_bytes()),
            ImageSource::Build { path, tag } => {
                hasher.update(path.as_bytes());
                hasher.update(tag.as_bytes());
            }
            ImageSource::Repository { tag } => hasher.update(tag.as_bytes()),
        }

        if let Some(logging) = &spec.logging {
            hasher.update(logging.driver.as_bytes());
            for (key, value) in &logging.options {
                hasher.update(key.as_bytes());
                hasher.update(value.as_bytes());
            }
        }

        if let Some(lb) = &spec.load_balancer {
            update_opt(&mut hasher, lb.name.as_deref());
            hasher.update(lb.port.to_be_bytes());
            hasher.update(lb.health_check.path.as_bytes());
            hasher.update(lb.health_check.status.as_bytes());
            hasher.update(lb.health_check.interval.as_bytes());
            hasher.update(lb.health_check.timeout.as_bytes());
            hasher.update(lb.health_check.healthy_limit.to_be_bytes());
            hasher.update(lb.health_check.unhealthy_limit.to_be_bytes());
            update_opt(&mut hasher, lb.security_group.as_deref());
            update_opt(&mut hasher, lb.certificate.as_deref());
            hasher.update(lb.ingress_source.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

fn update_opt(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str) -> ClusterSpec {
        ClusterSpec {
            cluster_name: name.to_string(),
            instance_type: String::from("t2.micro"),
            image_id: String::from("ami-1"),
            key_pair_name: None,
            initial_capacity: 2,
            instance_profile_name: None,
            network_id: None,
        }
    }

    #[test]
    fn test_cluster_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(
            hasher.hash_cluster(&cluster("c1")),
            hasher.hash_cluster(&cluster("c1"))
        );
    }

    #[test]
    fn test_different_clusters_different_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_cluster(&cluster("c1")),
            hasher.hash_cluster(&cluster("c2"))
        );
    }

    #[test]
    fn test_optional_fields_are_distinguished() {
        let hasher = ConfigHasher::new();
        let mut with_key = cluster("c1");
        with_key.key_pair_name = Some(String::new());

        assert_ne!(hasher.hash_cluster(&cluster("c1")), hasher.hash_cluster(&with_key));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }
}

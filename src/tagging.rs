//! Ownership tagging.
//!
//! Resources this system creates are stamped with a reserved tag whose
//! value is the creation timestamp. Teardown only deletes shared
//! resources (load balancers, security groups) that carry it.

use chrono::{DateTime, Utc};

use crate::cloud::Tags;

/// Reserved tag key marking resources created by ecsdeploy.
pub const OWNERSHIP_TAG_KEY: &str = "ecsdeploy_created";

/// Ownership marker stamped on created resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTag {
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
}

impl OwnershipTag {
    /// A marker for a resource created now.
    #[must_use]
    pub fn now() -> Self {
        Self {
            created_at: Utc::now(),
        }
    }

    /// Renders the marker as a tag set.
    #[must_use]
    pub fn to_tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(OWNERSHIP_TAG_KEY.to_string(), self.created_at.to_rfc3339());
        tags
    }

    /// Returns true if the tags mark the resource as created by this system.
    #[must_use]
    pub fn is_owned(tags: &Tags) -> bool {
        tags.contains_key(OWNERSHIP_TAG_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_after_tagging() {
        let tag = OwnershipTag::now();
        let tags = tag.to_tags();

        assert!(OwnershipTag::is_owned(&tags));
        let stamp = DateTime::parse_from_rfc3339(&tags[OWNERSHIP_TAG_KEY]).unwrap();
        assert_eq!(stamp.timestamp(), tag.created_at.timestamp());
    }

    #[test]
    fn test_foreign_tags_not_owned() {
        let mut tags = Tags::new();
        tags.insert(String::from("team"), String::from("platform"));

        assert!(!OwnershipTag::is_owned(&tags));
    }
}

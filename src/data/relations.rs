//! Relation membership tracking.
//!
//! Sources that see relation data (the bulk query service in particular)
//! record which relations each member feature participates in. Way/relation
//! normalization and the derived-attribute computer both consult this
//! registry so membership-derived properties come out the same regardless of
//! which source produced a feature.

use crate::data::feature::FeatureId;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One feature's membership in one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMembership {
    pub relation_id: FeatureId,
    pub role: String,
    pub relation_tags: FxHashMap<String, String>,
}

/// Registry of relation memberships keyed by member feature id.
#[derive(Debug, Default)]
pub struct RelationTracker {
    memberships: FxHashMap<FeatureId, Vec<RelationMembership>>,
}

impl RelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a membership; replaying the same relation for the same member
    /// overwrites rather than duplicates.
    pub fn record(&mut self, member: FeatureId, membership: RelationMembership) {
        let entries = self.memberships.entry(member).or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|m| m.relation_id == membership.relation_id)
        {
            *existing = membership;
        } else {
            entries.push(membership);
        }
    }

    /// All relations the feature is a member of.
    pub fn memberships_of(&self, member: &str) -> &[RelationMembership] {
        self.memberships.get(member).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.memberships.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(relation_id: &str) -> RelationMembership {
        RelationMembership {
            relation_id: relation_id.to_string(),
            role: "member".to_string(),
            relation_tags: FxHashMap::default(),
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let mut tracker = RelationTracker::new();
        tracker.record("way/1".to_string(), membership("relation/9"));

        assert_eq!(tracker.memberships_of("way/1").len(), 1);
        assert!(tracker.memberships_of("way/2").is_empty());
    }

    #[test]
    fn test_replay_overwrites_instead_of_duplicating() {
        let mut tracker = RelationTracker::new();
        tracker.record("way/1".to_string(), membership("relation/9"));
        let mut updated = membership("relation/9");
        updated.role = "outer".to_string();
        tracker.record("way/1".to_string(), updated);

        let memberships = tracker.memberships_of("way/1");
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].role, "outer");
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use xln_core::{EntityId, KyberPublicKey, Profile};

/// Last-writer-wins profile store keyed by entity.
///
/// Ordering is `metadata.last_updated` alone; an announcement at or before
/// the stored timestamp is silently ignored, which makes re-delivery
/// idempotent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStore {
    profiles: BTreeMap<EntityId, Profile>,
}

impl GossipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the profile was stored, false when it lost LWW.
    pub fn announce(&mut self, profile: Profile) -> bool {
        match self.profiles.get(&profile.entity_id) {
            Some(existing) if profile.metadata.last_updated <= existing.metadata.last_updated => {
                debug!(entity = %profile.entity_id, "stale gossip announcement ignored");
                false
            }
            _ => {
                self.profiles.insert(profile.entity_id, profile);
                true
            }
        }
    }

    pub fn get(&self, entity: &EntityId) -> Option<&Profile> {
        self.profiles.get(entity)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The encryption key onion layers toward `entity` are sealed against.
    pub fn encryption_key_of(&self, entity: &EntityId) -> Option<&KyberPublicKey> {
        self.profiles.get(entity).and_then(|p| p.encryption_pk.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(entity: u64, last_updated: u64, capability: &str) -> Profile {
        let mut p = Profile::new(EntityId::from_number(entity), last_updated);
        p.capabilities.push(capability.to_string());
        p
    }

    #[test]
    fn newer_announcement_wins() {
        let mut store = GossipStore::new();
        assert!(store.announce(profile(1, 100, "hub")));
        assert!(store.announce(profile(1, 200, "hub,router")));
        let stored = store.get(&EntityId::from_number(1)).unwrap();
        assert_eq!(stored.capabilities, vec!["hub,router".to_string()]);
    }

    #[test]
    fn stale_or_equal_announcement_is_noop() {
        let mut store = GossipStore::new();
        assert!(store.announce(profile(1, 200, "fresh")));
        assert!(!store.announce(profile(1, 200, "same-time")));
        assert!(!store.announce(profile(1, 100, "older")));
        let stored = store.get(&EntityId::from_number(1)).unwrap();
        assert_eq!(stored.capabilities, vec!["fresh".to_string()]);
    }
}

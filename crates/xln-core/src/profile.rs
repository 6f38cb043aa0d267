use std::collections::BTreeMap;

use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, KyberPublicKey, Timestamp, TokenId};

/// Usable capacity snapshot for one token of one account, as advertised
/// in gossip and consumed by the pathfinder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCapacity {
    #[serde(with = "xln_codec::bigint")]
    pub in_capacity: U256,
    #[serde(with = "xln_codec::bigint")]
    pub out_capacity: U256,
}

/// Capacity snapshot toward one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub token_capacities: BTreeMap<TokenId, TokenCapacity>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Last-writer-wins ordering key; older announcements are ignored.
    pub last_updated: Timestamp,
    /// Routing fee advertised by this entity, micro-basis-points.
    pub fee_rate_ubp: u64,
    pub base_fee: u64,
    /// Optional layout hint for visualizers; integer microunits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(i64, i64, i64)>,
}

/// An entity's gossiped self-description: capabilities, hub links,
/// per-account routing capacities, and the encryption key onion layers are
/// sealed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub entity_id: EntityId,
    pub capabilities: Vec<String>,
    pub hubs: Vec<EntityId>,
    pub metadata: ProfileMetadata,
    pub accounts: BTreeMap<EntityId, AccountSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_pk: Option<KyberPublicKey>,
}

impl Profile {
    pub fn new(entity_id: EntityId, last_updated: Timestamp) -> Self {
        Self {
            entity_id,
            capabilities: Vec::new(),
            hubs: Vec::new(),
            metadata: ProfileMetadata { last_updated, ..Default::default() },
            accounts: BTreeMap::new(),
            encryption_pk: None,
        }
    }
}

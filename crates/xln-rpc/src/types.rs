use serde::{Deserialize, Serialize};

/// JSON-safe replica summary returned by `xln_getReplica`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReplicaSummary {
    pub entity_id: String,
    pub signer_id: String,
    pub height: u64,
    pub timestamp: u64,
    pub is_proposer: bool,
    pub mempool_len: usize,
    pub account_peers: Vec<String>,
    /// token id → reserve (decimal string).
    pub reserves: Vec<(u32, String)>,
    pub last_finalized_j_height: u64,
}

/// JSON-safe account summary returned by `xln_getAccount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAccountSummary {
    pub left_entity: String,
    pub right_entity: String,
    pub height: u64,
    pub status: String,
    pub rollback_count: u64,
    pub pending: bool,
    /// token id → (net outflow, out capacity, in capacity), decimal strings.
    pub tokens: Vec<(u32, String, String, String)>,
    pub locks: usize,
    pub swap_offers: usize,
}

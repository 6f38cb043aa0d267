use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How the runtime observes its jurisdiction chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionMode {
    /// In-process chain delivering batched event callbacks.
    Embedded,
    /// External node polled over JSON-RPC at 1 Hz.
    Rpc,
}

/// Debug logging topics, enabled individually.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugTopic {
    AccountOpening,
    AccountFrame,
    EntityOutput,
    JEvents,
    Relay,
    Crontab,
}

/// Runtime environment configuration, supplied once at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub mode: JurisdictionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depository_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_provider_address: Option<String>,
    pub block_time_ms: u64,
    #[serde(default)]
    pub debug_logging: BTreeSet<DebugTopic>,
    /// Refuse cleartext onion envelopes when set (production posture).
    #[serde(default)]
    pub require_sealed_onions: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: JurisdictionMode::Embedded,
            rpc_url: None,
            depository_address: None,
            entity_provider_address: None,
            block_time_ms: 1000,
            debug_logging: BTreeSet::new(),
            require_sealed_onions: false,
        }
    }
}

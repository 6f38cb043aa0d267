use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::constants::{CRON_BATCH_INTERVAL_MS, MAX_R2R_PER_BATCH, MAX_SETTLEMENTS_PER_BATCH};
use crate::settle::SettlementDiff;
use crate::types::{EntityId, Timestamp, TokenId};

/// One co-signed account settlement awaiting chain broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettlement {
    pub counterparty: EntityId,
    pub diffs: Vec<SettlementDiff>,
}

/// One direct reserve-to-reserve transfer awaiting chain broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchR2r {
    pub to: EntityId,
    pub token_id: TokenId,
    #[serde(with = "xln_codec::bigint")]
    pub amount: U256,
}

/// An entity's outbound jurisdiction batch. Flushed by the crontab
/// `broadcast_batch` task when non-empty and the cadence has passed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JBatchState {
    pub settlements: Vec<BatchSettlement>,
    pub r2r: Vec<BatchR2r>,
    pub last_broadcast_at: Timestamp,
}

impl JBatchState {
    pub fn is_empty(&self) -> bool {
        self.settlements.is_empty() && self.r2r.is_empty()
    }

    /// Non-empty and at least one broadcast interval since the last flush.
    pub fn should_broadcast(&self, now: Timestamp) -> bool {
        !self.is_empty() && now.saturating_sub(self.last_broadcast_at) >= CRON_BATCH_INTERVAL_MS
    }

    pub fn has_settlement_room(&self) -> bool {
        self.settlements.len() < MAX_SETTLEMENTS_PER_BATCH
    }

    pub fn has_r2r_room(&self) -> bool {
        self.r2r.len() < MAX_R2R_PER_BATCH
    }

    /// Split off at most one batch worth of work, stamping the flush time.
    pub fn drain_batch(&mut self, now: Timestamp) -> (Vec<BatchSettlement>, Vec<BatchR2r>) {
        let settlements: Vec<BatchSettlement> = self
            .settlements
            .drain(..self.settlements.len().min(MAX_SETTLEMENTS_PER_BATCH))
            .collect();
        let r2r: Vec<BatchR2r> = self.r2r.drain(..self.r2r.len().min(MAX_R2R_PER_BATCH)).collect();
        self.last_broadcast_at = now;
        (settlements, r2r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_cadence() {
        let mut batch = JBatchState::default();
        assert!(!batch.should_broadcast(10_000));
        batch.r2r.push(BatchR2r { to: EntityId::from_number(2), token_id: 1, amount: U256::ONE });
        batch.last_broadcast_at = 1_000;
        assert!(!batch.should_broadcast(2_000));
        assert!(batch.should_broadcast(6_000));
        let (s, r) = batch.drain_batch(6_000);
        assert!(s.is_empty());
        assert_eq!(r.len(), 1);
        assert!(batch.is_empty());
        assert_eq!(batch.last_broadcast_at, 6_000);
    }
}

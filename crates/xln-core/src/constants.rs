//! ─── XLN Protocol Constants ─────────────────────────────────────────────────
//!
//! All timing constants are milliseconds against entity-local time
//! (`state.timestamp`), never wall time. All fee math is integer-only.

// ── Entity consensus ─────────────────────────────────────────────────────────

/// Maximum transactions held in an entity mempool.
pub const MEMPOOL_SIZE: usize = 1000;

/// Maximum transactions taken into one proposed frame.
pub const MAX_MEMPOOL_BATCH: usize = 100;

/// Maximum validators per entity quorum.
pub const MAX_VALIDATORS: usize = 100;

/// Chat / event message ring buffer capacity per entity.
pub const MESSAGE_RING_CAPACITY: usize = 100;

/// A proposal without commit after this long demotes the proposer
/// (round-robin rotation).
pub const PROPOSAL_TIMEOUT_MS: u64 = 10_000;

// ── Bilateral accounts ───────────────────────────────────────────────────────

/// Pending account frame older than this triggers a dispute-suggestion
/// chat event from the crontab sweep.
pub const ACCOUNT_TIMEOUT_MS: u64 = 30_000;

/// A pending account frame may be re-sent after this long without an ACK.
pub const ACCOUNT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Pending withdrawals expire after this long.
pub const WITHDRAWAL_TIMEOUT_MS: u64 = 300_000;

/// Account frames older than this are pruned from history.
pub const FRAME_AGE_MS: u64 = 60_000;

// ── HTLC routing ─────────────────────────────────────────────────────────────

/// Per-hop timelock decrement. `timelock(i) = base − (H−i−1)·Δ`.
pub const MIN_TIMELOCK_DELTA_MS: u64 = 10_000;

/// Maximum onion route length (incl. sender and recipient).
pub const MAX_HOPS: usize = 20;

/// Flat per-hop fee component (USD-token base units).
pub const BASE_FEE_USD: u128 = 0;

/// Proportional per-hop fee in micro-basis-points: 100 ubp = 1 bp.
pub const FEE_RATE_UBP: u128 = 100;

/// Fee denominator: `fee = BASE + amount·FEE_RATE_UBP / FEE_DENOMINATOR`.
pub const FEE_DENOMINATOR: u128 = 10_000_000;

// ── Jurisdiction batching ────────────────────────────────────────────────────

/// Maximum settlement ops per outbound jurisdiction batch.
pub const MAX_SETTLEMENTS_PER_BATCH: usize = 50;

/// Maximum reserve-to-reserve transfers per outbound batch.
pub const MAX_R2R_PER_BATCH: usize = 100;

// ── Relay ────────────────────────────────────────────────────────────────────

/// Pending wire frames held per offline destination; oldest dropped beyond.
pub const RELAY_QUEUE_CAPACITY: usize = 1000;

// ── Crontab cadences ─────────────────────────────────────────────────────────

/// `check_account_timeouts` interval.
pub const CRON_ACCOUNT_TIMEOUT_INTERVAL_MS: u64 = 10_000;

/// `broadcast_batch` interval.
pub const CRON_BATCH_INTERVAL_MS: u64 = 5_000;

/// `hub_rebalance` interval.
pub const CRON_REBALANCE_INTERVAL_MS: u64 = 30_000;

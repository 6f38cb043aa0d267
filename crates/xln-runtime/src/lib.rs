//! The deterministic runtime: a single `Env` owning every replica, a tick
//! function `step(env, input)` that externalizes all non-determinism, the
//! crontab sweep, snapshot encoding, and cross-cutting invariant checks.

pub mod crontab;
pub mod env;
pub mod payment;
pub mod snapshot;
pub mod validation;

pub use crontab::CronOutcome;
pub use env::{replica_key, step, Env, RuntimeInput, RuntimeTx, StepOutputs};
pub use payment::build_htlc_payment;
pub use snapshot::{
    decode_snapshot, decode_snapshot_str, encode_snapshot, snapshot_checksum, snapshot_string,
};
pub use validation::validate_env;

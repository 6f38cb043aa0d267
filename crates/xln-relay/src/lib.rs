//! Relay layer: a content-agnostic router that delivers encrypted entity
//! messages over a thin WebSocket text-frame transport, queues for offline
//! peers, and serves capability/profile gossip.

pub mod router;
pub mod serve;

pub use router::{ClientId, RelayAction, RelayRouter};
pub use serve::{serve, RelayService};

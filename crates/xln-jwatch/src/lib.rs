//! Jurisdiction event pipeline: canonical chain events in (embedded
//! callback or 1 Hz RPC poll, batched per block, injected into entity
//! consensus as `j_event` transactions), co-signed settlement batches out.

pub mod embedded;
pub mod rpc;
pub mod watcher;

pub use embedded::{EmbeddedJurisdiction, JBatchTx};
pub use rpc::JRpcClient;
pub use watcher::{assert_event_schema, ingest_block};

pub mod api;
pub mod server;
pub mod types;

pub use api::XlnApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::{RpcAccountSummary, RpcReplicaSummary};

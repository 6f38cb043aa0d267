use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use serde_json::Value;

use crate::types::{RpcAccountSummary, RpcReplicaSummary};

/// XLN runtime JSON-RPC 2.0 API.
///
/// All method names are prefixed with "xln_" via `namespace = "xln"`.
/// Big integers are returned as decimal strings; entity references accept
/// any universal form (`0x…`, `#N`, `@name`).
#[rpc(server, namespace = "xln")]
pub trait XlnApi {
    /// Current runtime tick height.
    #[method(name = "getHeight")]
    async fn get_height(&self) -> RpcResult<u64>;

    /// Summary of one replica by entity reference and signer id.
    #[method(name = "getReplica")]
    async fn get_replica(&self, entity: String, signer: String)
        -> RpcResult<Option<RpcReplicaSummary>>;

    /// Summary of one bilateral account from `entity`'s side.
    #[method(name = "getAccount")]
    async fn get_account(&self, entity: String, peer: String)
        -> RpcResult<Option<RpcAccountSummary>>;

    /// Chat / event log of an entity (any local replica's view).
    #[method(name = "getMessages")]
    async fn get_messages(&self, entity: String) -> RpcResult<Vec<String>>;

    /// All gossip profiles known to this runtime, tagged-JSON encoded.
    #[method(name = "getGossip")]
    async fn get_gossip(&self) -> RpcResult<Value>;

    /// Queue entity inputs for the next tick. `input` is a tagged-JSON
    /// `RuntimeInput`; `now` is ignored (the tick loop injects time).
    #[method(name = "submitInput")]
    async fn submit_input(&self, input: Value) -> RpcResult<bool>;
}

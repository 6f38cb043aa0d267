use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use xln_core::parse_entity_ref;
use xln_runtime::{Env, RuntimeInput};

use crate::api::XlnApiServer;
use crate::types::{RpcAccountSummary, RpcReplicaSummary};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Shared state behind the RPC server: a read view of the env and a queue
/// into the tick loop.
pub struct RpcServerState {
    pub env: Arc<Mutex<Env>>,
    /// Inputs handed to the next tick.
    pub input_tx: mpsc::Sender<RuntimeInput>,
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);
        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;
        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl XlnApiServer for RpcServer {
    async fn get_height(&self) -> RpcResult<u64> {
        Ok(self.state.env.lock().await.height)
    }

    async fn get_replica(
        &self,
        entity: String,
        signer: String,
    ) -> RpcResult<Option<RpcReplicaSummary>> {
        let (entity_id, _) =
            parse_entity_ref(&entity).map_err(|e| rpc_err(-32602, e.to_string()))?;
        let env = self.state.env.lock().await;
        Ok(env.replica(&entity_id, &signer).map(|replica| RpcReplicaSummary {
            entity_id: replica.entity_id.to_hex(),
            signer_id: replica.signer_id.clone(),
            height: replica.state.height,
            timestamp: replica.state.timestamp,
            is_proposer: replica.is_proposer(),
            mempool_len: replica.mempool.len(),
            account_peers: replica.state.accounts.keys().map(|p| p.to_hex()).collect(),
            reserves: replica
                .state
                .reserves
                .iter()
                .map(|(token, amount)| (*token, amount.to_string()))
                .collect(),
            last_finalized_j_height: replica.state.last_finalized_j_height,
        }))
    }

    async fn get_account(
        &self,
        entity: String,
        peer: String,
    ) -> RpcResult<Option<RpcAccountSummary>> {
        let (entity_id, _) =
            parse_entity_ref(&entity).map_err(|e| rpc_err(-32602, e.to_string()))?;
        let (peer_id, _) = parse_entity_ref(&peer).map_err(|e| rpc_err(-32602, e.to_string()))?;
        let env = self.state.env.lock().await;
        let machine = env
            .replicas
            .values()
            .find(|r| r.entity_id == entity_id)
            .and_then(|r| r.state.accounts.get(&peer_id));
        Ok(machine.map(|m| RpcAccountSummary {
            left_entity: m.left_entity.to_hex(),
            right_entity: m.right_entity.to_hex(),
            height: m.current_frame.height,
            status: format!("{:?}", m.status),
            rollback_count: m.rollback_count,
            pending: m.pending_frame.is_some(),
            tokens: m
                .deltas
                .keys()
                .map(|token| {
                    (
                        *token,
                        m.net_outflow(*token).to_string(),
                        m.out_capacity(*token).to_string(),
                        m.in_capacity(*token).to_string(),
                    )
                })
                .collect(),
            locks: m.locks.len(),
            swap_offers: m.swap_offers.len(),
        }))
    }

    async fn get_messages(&self, entity: String) -> RpcResult<Vec<String>> {
        let (entity_id, _) =
            parse_entity_ref(&entity).map_err(|e| rpc_err(-32602, e.to_string()))?;
        let env = self.state.env.lock().await;
        Ok(env
            .replicas
            .values()
            .find(|r| r.entity_id == entity_id)
            .map(|r| r.state.messages.clone())
            .unwrap_or_default())
    }

    async fn get_gossip(&self) -> RpcResult<Value> {
        let env = self.state.env.lock().await;
        let profiles: Vec<_> = env.gossip.profiles().collect();
        serde_json::to_value(profiles).map_err(|e| rpc_err(-32603, e.to_string()))
    }

    async fn submit_input(&self, input: Value) -> RpcResult<bool> {
        let input: RuntimeInput =
            serde_json::from_value(input).map_err(|e| rpc_err(-32602, e.to_string()))?;
        self.state
            .input_tx
            .send(input)
            .await
            .map_err(|_| rpc_err(-32603, "runtime tick loop is gone"))?;
        Ok(true)
    }
}

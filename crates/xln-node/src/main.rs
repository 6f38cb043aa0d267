//! xln-node — the XLN runtime binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the snapshot database
//!   2. Restore the latest snapshot or build a fresh env
//!   3. Import replicas named on the command line
//!   4. Start the relay WebSocket server and the JSON-RPC 2.0 server
//!   5. Run the tick loop: gather inputs → step → snapshot → route outputs

mod store;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use xln_core::{parse_entity_ref, EntityId, JurisdictionMode, RuntimeConfig, XlnError};
use xln_crypto::{EncryptionKeyPair, KeyPair};
use xln_jwatch::{assert_event_schema, ingest_block, EmbeddedJurisdiction, JRpcClient};
use xln_relay::{RelayRouter, RelayService};
use xln_rpc::{RpcServer, RpcServerState};
use xln_runtime::{
    decode_snapshot_str, snapshot_string, step, Env, RuntimeInput, RuntimeTx,
};

use store::SnapshotStore;

#[derive(Parser, Debug)]
#[command(
    name = "xln-node",
    version,
    about = "XLN runtime node — off-chain settlement entities over a jurisdiction chain"
)]
struct Args {
    /// Directory for the persistent snapshot database.
    #[arg(long, default_value = "~/.xln/data")]
    data_dir: PathBuf,

    /// Relay WebSocket listen address.
    #[arg(long, default_value = "127.0.0.1:9090")]
    relay_listen: SocketAddr,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8546")]
    rpc_addr: SocketAddr,

    /// Jurisdiction mode: embedded (in-process chain) or rpc (poll a node).
    #[arg(long, default_value = "embedded")]
    mode: String,

    /// External jurisdiction JSON-RPC URL (rpc mode).
    #[arg(long)]
    rpc_url: Option<String>,

    /// Depository contract address on the jurisdiction.
    #[arg(long)]
    depository: Option<String>,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    block_time_ms: u64,

    /// Refuse cleartext onion envelopes (production posture).
    #[arg(long, default_value_t = false)]
    require_sealed_onions: bool,

    /// Replicas to import at boot, as `<entityRef>=<signer>`
    /// (e.g. `#1=s1`). Single-signer quorums; richer boards come in
    /// through the RPC admin surface.
    #[arg(long, value_delimiter = ',')]
    import: Vec<String>,

    /// Keep this many recent snapshots; older ones are pruned.
    #[arg(long, default_value_t = 1000)]
    snapshot_keep: u64,
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xln=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("XLN node starting");

    let mode = match args.mode.as_str() {
        "embedded" => JurisdictionMode::Embedded,
        "rpc" => JurisdictionMode::Rpc,
        other => anyhow::bail!("unknown mode {other}: expected embedded or rpc"),
    };
    let config = RuntimeConfig {
        mode,
        rpc_url: args.rpc_url.clone(),
        depository_address: args.depository.clone(),
        entity_provider_address: None,
        block_time_ms: args.block_time_ms,
        debug_logging: Default::default(),
        require_sealed_onions: args.require_sealed_onions,
    };

    // ── Snapshot database ─────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let store = SnapshotStore::open(&data_dir)?;

    // ── Restore or fresh env ──────────────────────────────────────────────────
    let mut env = match store.load_latest()? {
        Some((height, raw)) => {
            info!(height, "restoring snapshot");
            let mut env = decode_snapshot_str(&raw).context("decoding snapshot")?;
            env.config = config.clone();
            env
        }
        None => {
            info!("fresh database, building new env");
            let seed: [u8; 32] = rand::random();
            Env::new(config.clone(), xln_core::Hash32::from_bytes(seed))
        }
    };

    // ── Boot imports ──────────────────────────────────────────────────────────
    let mut boot_txs = Vec::new();
    for spec in &args.import {
        let (entity, signer) = parse_import(spec)?;
        if env.replica(&entity, &signer).is_none() {
            boot_txs.push(RuntimeTx::ImportReplica {
                entity_id: entity,
                signer_id: signer.clone(),
                config: xln_core::ConsensusConfig::single(signer.clone()),
            });
        }
        if !env.signers.contains_key(&signer) {
            env.register_signer(signer.clone(), KeyPair::generate());
        }
        if !env.encryption.contains_key(&entity) {
            env.register_encryption(entity, EncryptionKeyPair::generate());
        }
    }

    // ── Jurisdiction backend ──────────────────────────────────────────────────
    let mut jurisdiction = Jurisdiction::build(&config).await?;

    // ── Relay server ──────────────────────────────────────────────────────────
    let (local_tx, mut local_rx) = mpsc::channel::<serde_json::Value>(256);
    let mut router = RelayRouter::new();
    for entity in env.local_entities() {
        router.register_local(entity);
    }
    for (entity, _) in args.import.iter().filter_map(|s| parse_import(s).ok()) {
        router.register_local(entity);
    }
    let relay = RelayService::new(router, local_tx);
    let relay_listener = tokio::net::TcpListener::bind(args.relay_listen).await?;
    tokio::spawn(xln_relay::serve(relay_listener, Arc::clone(&relay)));

    // ── RPC server ────────────────────────────────────────────────────────────
    let env = Arc::new(Mutex::new(env));
    let (input_tx, mut input_rx) = mpsc::channel::<RuntimeInput>(256);
    let rpc_state = Arc::new(RpcServerState { env: Arc::clone(&env), input_tx });
    let _rpc_handle = RpcServer::new(Arc::clone(&rpc_state)).start(args.rpc_addr).await?;

    // ── Tick loop ─────────────────────────────────────────────────────────────
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(args.block_time_ms));
    let mut pending_runtime_txs = boot_txs;
    info!(block_time_ms = args.block_time_ms, "entering tick loop");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down, writing final snapshot");
                let env = env.lock().await;
                if let Ok(raw) = snapshot_string(&env) {
                    let _ = store.save(env.height, &raw);
                }
                return Ok(());
            }
        }

        let mut input = RuntimeInput {
            now: wall_clock_ms(),
            runtime_txs: std::mem::take(&mut pending_runtime_txs),
            entity_inputs: Vec::new(),
        };

        // Queued RPC submissions.
        while let Ok(queued) = input_rx.try_recv() {
            input.runtime_txs.extend(queued.runtime_txs);
            input.entity_inputs.extend(queued.entity_inputs);
        }

        // Frames routed to locally-hosted entities by the relay.
        while let Ok(frame) = local_rx.try_recv() {
            match frame.get("payload").cloned().map(serde_json::from_value) {
                Some(Ok(entity_input)) => input.entity_inputs.push(entity_input),
                _ => warn!("relay delivered an undecodable entity input"),
            }
        }

        // Jurisdiction events.
        let mut env_guard = env.lock().await;
        let entities = env_guard.local_entities();
        match jurisdiction.collect_blocks().await {
            Ok(blocks) => {
                for block in &blocks {
                    input.entity_inputs.extend(ingest_block(block, &entities));
                }
            }
            Err(err) => warn!(code = %err.code(), "jurisdiction unavailable this tick"),
        }

        let outputs = step(&mut env_guard, input);

        // Persist the post-tick snapshot.
        match snapshot_string(&env_guard) {
            Ok(raw) => {
                if let Err(err) = store.save(env_guard.height, &raw) {
                    warn!(%err, "snapshot write failed");
                }
                let _ = store.prune(args.snapshot_keep);
            }
            Err(err) => warn!(code = %err.code(), "snapshot encoding failed"),
        }
        drop(env_guard);

        // Route cross-runtime outputs through the relay.
        for entity_input in outputs.entity_outbox {
            let frame = json!({
                "type": "entity_input",
                "to": entity_input.entity_id.to_hex(),
                "payload": entity_input,
            });
            relay.handle_local(frame.to_string()).await;
        }

        // Gossip announcements.
        if !outputs.gossip.is_empty() {
            let frame = json!({
                "type": "gossip_announce",
                "payload": { "profiles": outputs.gossip },
            });
            relay.handle_local(frame.to_string()).await;
        }

        // Outbound jurisdiction batches.
        for batch in outputs.j_batches {
            if let Err(err) = jurisdiction.submit(batch).await {
                warn!(code = %err.code(), "BATCH_BROADCAST_FAILED");
            }
        }
    }
}

fn parse_import(spec: &str) -> anyhow::Result<(EntityId, String)> {
    let (entity_part, signer) = spec
        .split_once('=')
        .with_context(|| format!("import spec `{spec}` is not <entityRef>=<signer>"))?;
    let (entity, _) = parse_entity_ref(entity_part)?;
    Ok((entity, signer.to_string()))
}

/// The two jurisdiction backends behind one seam.
enum Jurisdiction {
    Embedded(EmbeddedJurisdiction),
    Rpc { client: JRpcClient, cursor: u64 },
}

impl Jurisdiction {
    async fn build(config: &RuntimeConfig) -> anyhow::Result<Self> {
        match config.mode {
            JurisdictionMode::Embedded => Ok(Jurisdiction::Embedded(EmbeddedJurisdiction::new())),
            JurisdictionMode::Rpc => {
                let url = config
                    .rpc_url
                    .as_deref()
                    .context("rpc mode requires --rpc-url")?;
                let client = JRpcClient::new(url);
                // ABI/enum parity with the registered schema is load-bearing.
                let schema = client.event_schema().await.context("fetching event schema")?;
                assert_event_schema(&schema).context("event schema parity check")?;
                Ok(Jurisdiction::Rpc { client, cursor: 0 })
            }
        }
    }

    async fn collect_blocks(&mut self) -> Result<Vec<xln_core::JBlock>, XlnError> {
        match self {
            Jurisdiction::Embedded(chain) => Ok(vec![chain.produce_block()]),
            Jurisdiction::Rpc { client, cursor } => {
                let blocks = client.poll_since(*cursor).await?;
                if let Some(last) = blocks.last() {
                    *cursor = last.block_number;
                }
                Ok(blocks)
            }
        }
    }

    async fn submit(&mut self, batch: xln_jwatch::JBatchTx) -> Result<String, XlnError> {
        match self {
            Jurisdiction::Embedded(chain) => Ok(chain.submit_batch(batch)),
            Jurisdiction::Rpc { client, .. } => client.submit_batch(&batch).await,
        }
    }
}

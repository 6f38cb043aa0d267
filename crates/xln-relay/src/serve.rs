use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::router::{ClientId, RelayAction, RelayRouter};

/// Shared relay service state: the pure router plus the live socket map.
pub struct RelayService {
    router: Mutex<RelayRouter>,
    senders: Mutex<BTreeMap<ClientId, mpsc::Sender<String>>>,
    next_client: AtomicU64,
    /// Frames addressed to locally-hosted entities.
    local_tx: mpsc::Sender<Value>,
}

impl RelayService {
    pub fn new(router: RelayRouter, local_tx: mpsc::Sender<Value>) -> Arc<Self> {
        Arc::new(Self {
            router: Mutex::new(router),
            senders: Mutex::new(BTreeMap::new()),
            next_client: AtomicU64::new(1),
            local_tx,
        })
    }

    /// Run a routed frame originating from the local runtime itself.
    pub async fn handle_local(&self, frame: String) {
        let actions = {
            let mut router = self.router.lock().await;
            router.handle_frame(0, &frame)
        };
        self.dispatch(0, actions).await;
    }

    async fn dispatch(&self, origin: ClientId, actions: Vec<RelayAction>) {
        for action in actions {
            match action {
                RelayAction::Reply(value) => {
                    self.send_to(origin, value.to_string()).await;
                }
                RelayAction::Forward { client, frame } => {
                    self.send_to(client, frame).await;
                }
                RelayAction::DeliverLocal(value) => {
                    if self.local_tx.send(value).await.is_err() {
                        warn!("local runtime inbox closed, dropping frame");
                    }
                }
            }
        }
    }

    async fn send_to(&self, client: ClientId, frame: String) {
        let sender = { self.senders.lock().await.get(&client).cloned() };
        match sender {
            Some(sender) => {
                if sender.send(frame).await.is_err() {
                    debug!(client, "send to closed relay client");
                }
            }
            None => debug!(client, "no live socket for relay client"),
        }
    }
}

/// Accept WebSocket clients forever, one task per connection.
pub async fn serve(listener: TcpListener, service: Arc<RelayService>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "relay listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, service).await {
                debug!(%peer, %err, "relay connection ended");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, service: Arc<RelayService>) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    let client = service.next_client.fetch_add(1, Ordering::Relaxed);

    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    service.senders.lock().await.insert(client, out_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let actions = {
                    let mut router = service.router.lock().await;
                    router.handle_frame(client, text.as_ref())
                };
                service.dispatch(client, actions).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // binary / ping frames are transport noise here
        }
    }

    service.senders.lock().await.remove(&client);
    service.router.lock().await.disconnect(client);
    writer.abort();
    Ok(())
}

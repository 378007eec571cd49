use crate::http_server::AppState;
use crate::types::Frame;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry of open WebSocket connections. Each connection owns a bounded
/// outbound queue; a broadcast that finds a queue full evicts that client.
pub struct Hub {
    clients: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    queue_depth: usize,
}

impl Hub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Add a client. The welcome frame is queued before the client becomes
    /// visible to broadcasts, so it is always the first frame delivered.
    pub async fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = Uuid::new_v4();
        // Fresh channel with capacity >= 1 cannot be full.
        let _ = tx.try_send(Frame::welcome().to_json());
        self.clients.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: &Uuid) {
        self.clients.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Queue `frame` for every open connection. Returns how many clients
    /// accepted it; slow or closed clients are dropped from the registry.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let payload = frame.to_json();
        let mut delivered = 0;
        let mut evicted = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, tx) in clients.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(client = %id, "websocket client too slow, disconnecting");
                        evicted.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(*id),
                }
            }
        }
        if !evicted.is_empty() {
            let mut clients = self.clients.write().await;
            for id in &evicted {
                clients.remove(id);
            }
        }
        debug!(delivered, evicted = evicted.len(), "broadcast");
        delivered
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub.clone();
    let (id, mut rx) = hub.register().await;
    let clients = hub.len().await;
    info!(client = %id, clients, "websocket client connected");

    let (mut sink, mut stream) = socket.split();

    // Registry queue → socket. Ends when the hub drops our sender.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Socket → broadcast
    let read_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            let text = match msg {
                Message::Text(t) => t.as_str().to_owned(),
                Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                Message::Close(_) => break,
                _ => continue,
            };
            debug!(client = %id, message = %text, "received websocket message");
            read_hub.broadcast(&Frame::echo(&text)).await;
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&id).await;
    info!(client = %id, "websocket client disconnected");
}

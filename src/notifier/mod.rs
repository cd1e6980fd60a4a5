/*
 * WebSocket event sink: typed lossy broadcast to subscribers
 */

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server as handshake;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::models::ArbitrageEvent;

pub trait Notifier: Send + Sync {
    /// Enqueue an event for delivery. Never blocks; delivery is best-effort.
    fn broadcast(&self, event: ArbitrageEvent);
}

type SubscriberMap = Arc<RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>>;

pub struct WsServer {
    events_tx: mpsc::UnboundedSender<ArbitrageEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ArbitrageEvent>>>,
    subscribers: SubscriberMap,
    next_id: AtomicU64,
}

impl Default for WsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl WsServer {
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run the accept loop and the single fan-out task until `ctx` is
    /// cancelled. Callable once per server.
    pub async fn serve(&self, port: u16, ctx: CancellationToken) {
        let Some(mut events_rx) = self.events_rx.lock().expect("events lock poisoned").take()
        else {
            error!("event sink already serving");
            return;
        };

        let subscribers = self.subscribers.clone();
        let fanout_ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = fanout_ctx.cancelled() => return,
                    event = events_rx.recv() => {
                        let Some(event) = event else { return };
                        fan_out(&subscribers, &event);
                    }
                }
            }
        });

        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "event sink failed to bind");
                return;
            }
        };
        info!(%addr, "event sink listening");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                accepted = listener.accept() => {
                    let Ok((stream, peer)) = accepted else { continue };
                    let subscribers = self.subscribers.clone();
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        let ws = match tokio_tungstenite::accept_hdr_async(stream, require_ws_path).await {
                            Ok(ws) => ws,
                            Err(e) => {
                                warn!(%peer, error = %e, "ws upgrade failed");
                                return;
                            }
                        };
                        info!(%peer, "subscriber connected");
                        handle_subscriber(id, ws, subscribers).await;
                        info!(%peer, "subscriber disconnected");
                    });
                }
            }
        }
    }
}

impl Notifier for WsServer {
    fn broadcast(&self, event: ArbitrageEvent) {
        // Receiver only goes away on shutdown; losing events then is fine.
        let _ = self.events_tx.send(event);
    }
}

/// Handshake callback: subscribers connect at `/ws`. Origins are not
/// checked; dashboards connect from anywhere.
fn require_ws_path(
    req: &handshake::Request,
    resp: handshake::Response,
) -> std::result::Result<handshake::Response, handshake::ErrorResponse> {
    if req.uri().path() == "/ws" {
        Ok(resp)
    } else {
        let mut rejection = handshake::ErrorResponse::new(Some("not found".to_string()));
        *rejection.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
        Err(rejection)
    }
}

/// Serialize once and write to every subscriber's outbound queue. A failed
/// write closes that subscriber: its queue is dropped here and its
/// connection task exits on the closed channel.
fn fan_out(subscribers: &SubscriberMap, event: &ArbitrageEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "event serialization failed");
            return;
        }
    };

    let dead: Vec<u64> = {
        let subs = subscribers.read().expect("subscriber lock poisoned");
        subs.iter()
            .filter_map(|(id, tx)| {
                tx.send(Message::Text(payload.clone())).err().map(|_| *id)
            })
            .collect()
    };

    if !dead.is_empty() {
        let mut subs = subscribers.write().expect("subscriber lock poisoned");
        for id in dead {
            subs.remove(&id);
            warn!(subscriber = id, "dropped unreachable subscriber");
        }
    }
}

async fn handle_subscriber<S>(
    id: u64,
    ws: tokio_tungstenite::WebSocketStream<S>,
    subscribers: SubscriberMap,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    subscribers
        .write()
        .expect("subscriber lock poisoned")
        .insert(id, tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                // Subscribers only listen; the read loop exists to notice
                // disconnects.
                match inbound {
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    subscribers
        .write()
        .expect("subscriber lock poisoned")
        .remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn heartbeat(n: u64) -> ArbitrageEvent {
        ArbitrageEvent::Heartbeat {
            block_number: n,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn fan_out_delivers_to_registered_subscribers() {
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        subscribers.write().unwrap().insert(0, tx);

        fan_out(&subscribers, &heartbeat(7));

        let msg = rx.try_recv().unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        assert!(text.contains("\"HEARTBEAT\""));
        assert!(text.contains("\"blockNumber\":7"));
    }

    #[test]
    fn fan_out_removes_dead_subscribers() {
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        subscribers.write().unwrap().insert(0, alive_tx);
        subscribers.write().unwrap().insert(1, dead_tx);

        fan_out(&subscribers, &heartbeat(1));

        assert_eq!(subscribers.read().unwrap().len(), 1);
        assert!(alive_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_enqueues_without_server_running() {
        let server = WsServer::new();
        server.broadcast(heartbeat(1));
        server.broadcast(heartbeat(2));

        let mut rx = server.events_rx.lock().unwrap().take().unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(ArbitrageEvent::Heartbeat { block_number: 1, .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(ArbitrageEvent::Heartbeat { block_number: 2, .. })
        ));
    }
}

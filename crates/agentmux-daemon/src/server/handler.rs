//! axum WebSocket transport for the hub.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use super::hub::{BroadcastHub, ConnectionHandle};

/// Routes: the control channel is served at `/` and `/ws`.
pub fn router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(hub)
}

/// Serve the control channel until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(State(hub): State<Arc<BroadcastHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let ConnectionHandle { id, mut rx } = hub.connect().await;
    let (mut sender, mut receiver) = socket.split();

    // Ends when the hub drops the connection or the socket fails.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn_id = id, error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle_text(id, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => {
                    debug!(conn_id = id, "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn_id = id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    send_task.abort();
    hub.disconnect(id).await;
}

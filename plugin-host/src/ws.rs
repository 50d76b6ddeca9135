use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use kube_backup::plugin::rpc::PluginServer;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<PluginServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_plugin_socket(socket, server))
}

async fn handle_plugin_socket(socket: WebSocket, server: Arc<PluginServer>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tracing::info!("Plugin client connected");

    // Forward replies to the client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        // Calls run concurrently; a slow snapshot must not hold up the rest.
        let server = server.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = server.handle_text(&text).await {
                let _ = tx.send(reply);
            }
        });
    }

    drop(tx);
    send_task.abort();
    tracing::info!("Plugin client disconnected");
}

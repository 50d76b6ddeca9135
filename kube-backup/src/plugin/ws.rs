//! WebSocket transport to a plugin host.
//!
//! One connection multiplexes any number of in-flight calls; replies are
//! matched to callers by request id.

use super::rpc::{PluginRequest, PluginResponse, RpcMessage, RpcTransport};
use crate::utils::errors::PluginError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type Pending = Arc<DashMap<String, oneshot::Sender<PluginResponse>>>;

pub struct WsTransport {
    url: String,
    outgoing: mpsc::UnboundedSender<String>,
    pending: Pending,
    timeout: Duration,
    connection: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to a plugin host, e.g. `ws://127.0.0.1:9700/ws/plugins`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, PluginError> {
        info!("Connecting to plugin host: {}", url);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| PluginError::Transport(format!("{url}: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let pending: Pending = Arc::new(DashMap::new());
        let connection = tokio::spawn(run_connection(
            url.to_string(),
            ws_stream,
            rx,
            pending.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            outgoing: tx,
            pending,
            timeout,
            connection,
        })
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_connection(
    url: String,
    ws_stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    pending: Pending,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RpcMessage<PluginResponse>>(&text) {
                            Ok(reply) => {
                                if let Some((_, waiter)) = pending.remove(&reply.request_id) {
                                    let _ = waiter.send(reply.body);
                                } else {
                                    debug!(request_id = %reply.request_id, "Reply for unknown or expired request");
                                }
                            }
                            Err(e) => warn!("Unreadable reply from plugin host: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Plugin host {} closed the connection", url);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Plugin host {} read error: {}", url, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Wake every waiting caller with a closed channel.
    pending.clear();
}

#[async_trait]
impl RpcTransport for WsTransport {
    async fn call(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let message = RpcMessage::new(request);
        let text = serde_json::to_string(&message).map_err(|e| PluginError::Protocol(e.to_string()))?;
        let request_id = message.request_id;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if self.outgoing.send(text).is_err() {
            self.pending.remove(&request_id);
            return Err(PluginError::Transport(format!("{}: connection closed", self.url)));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                Err(PluginError::Transport(format!("{}: connection closed", self.url)))
            }
            Err(_) => {
                self.pending.remove(&request_id);
                Err(PluginError::Timeout {
                    plugin: message.body.plugin().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::downstream::{ChannelError, SpeechChannel};
use crate::protocol::ConnectionStatus;

#[derive(Debug, Clone)]
pub struct WebSocketChannelConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SpeechFrame<'a> {
    Utterance { text: &'a str },
}

struct OutgoingUtterance {
    text: String,
    done: oneshot::Sender<Result<(), ChannelError>>,
}

/// Speech channel backed by a WebSocket connection that is re-established
/// whenever it drops. Each utterance is sent as one JSON text frame.
#[derive(Debug)]
pub struct WebSocketSpeechChannel {
    outgoing: mpsc::Sender<OutgoingUtterance>,
    status: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for OutgoingUtterance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingUtterance")
            .field("text", &self.text)
            .finish()
    }
}

impl WebSocketSpeechChannel {
    pub fn spawn(config: WebSocketChannelConfig, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        tokio::spawn(connection_loop(config, outgoing_rx, status_tx, shutdown));
        Arc::new(Self {
            outgoing: outgoing_tx,
            status: status_rx,
        })
    }
}

#[async_trait]
impl SpeechChannel for WebSocketSpeechChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if !self.status.borrow().is_connected() {
            return Err(ChannelError::Disconnected);
        }
        let (done, result) = oneshot::channel();
        self.outgoing
            .send(OutgoingUtterance {
                text: text.to_string(),
                done,
            })
            .await
            .map_err(|_| ChannelError::Disconnected)?;
        result.await.map_err(|_| ChannelError::Disconnected)?
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

async fn connection_loop(
    config: WebSocketChannelConfig,
    mut outgoing: mpsc::Receiver<OutgoingUtterance>,
    status: watch::Sender<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        status.send_replace(ConnectionStatus::Connecting);
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!(url = %config.url, "speech channel connected");
                status.send_replace(ConnectionStatus::Connected);
                serve(socket, &mut outgoing, &mut shutdown).await;
                status.send_replace(ConnectionStatus::Disconnected);
                tracing::warn!(url = %config.url, "speech channel disconnected");
            }
            Err(err) => {
                status.send_replace(ConnectionStatus::Disconnected);
                tracing::warn!(url = %config.url, "speech channel connect failed: {}", err);
            }
        }

        // Utterances queued while the socket was down are stale.
        while let Ok(frame) = outgoing.try_recv() {
            let _ = frame.done.send(Err(ChannelError::Disconnected));
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(config.reconnect_delay) => {}
        }
    }
    status.send_replace(ConnectionStatus::Disconnected);
}

async fn serve(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing: &mut mpsc::Receiver<OutgoingUtterance>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return;
            }
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return;
                };
                let result = match encode_utterance(&frame.text) {
                    Ok(payload) => sink
                        .send(Message::Text(payload.into()))
                        .await
                        .map_err(|err| ChannelError::Transport(err.to_string())),
                    Err(err) => Err(err),
                };
                let transport_failed = matches!(result, Err(ChannelError::Transport(_)));
                let _ = frame.done.send(result);
                if transport_failed {
                    return;
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!("speech channel read error: {}", err);
                        return;
                    }
                }
            }
        }
    }
}

fn encode_utterance(text: &str) -> Result<String, ChannelError> {
    serde_json::to_string(&SpeechFrame::Utterance { text })
        .map_err(|err| ChannelError::Encode(err.to_string()))
}

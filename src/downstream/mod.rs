use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use url::Url;

use crate::protocol::ConnectionStatus;

mod console;
#[cfg(test)]
pub mod memory;
mod websocket;

pub use console::ConsoleSpeechChannel;
pub use websocket::{WebSocketChannelConfig, WebSocketSpeechChannel};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("speech channel is not connected")]
    Disconnected,
    #[error("speech channel transport failed: {0}")]
    Transport(String),
    #[error("failed to encode utterance: {0}")]
    Encode(String),
}

/// The real-time speech channel utterances are dispatched to.
#[async_trait]
pub trait SpeechChannel: Send + Sync {
    /// Dispatches one complete utterance.
    async fn send(&self, text: &str) -> Result<(), ChannelError>;
    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechTarget {
    Console,
    WebSocket(Url),
}

pub fn build_channel(
    target: SpeechTarget,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
) -> Arc<dyn SpeechChannel> {
    match target {
        SpeechTarget::Console => Arc::new(ConsoleSpeechChannel::new()),
        SpeechTarget::WebSocket(url) => WebSocketSpeechChannel::spawn(
            WebSocketChannelConfig {
                url,
                reconnect_delay,
            },
            shutdown,
        ),
    }
}

use async_trait::async_trait;
use tokio::sync::watch;

use crate::downstream::{ChannelError, SpeechChannel};
use crate::protocol::ConnectionStatus;

/// Logs utterances instead of speaking them. Always connected.
#[derive(Debug)]
pub struct ConsoleSpeechChannel {
    status: watch::Sender<ConnectionStatus>,
}

impl ConsoleSpeechChannel {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        Self { status }
    }
}

impl Default for ConsoleSpeechChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechChannel for ConsoleSpeechChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        tracing::info!("speech output: {}", text);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

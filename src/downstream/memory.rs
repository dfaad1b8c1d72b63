use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::downstream::{ChannelError, SpeechChannel};
use crate::protocol::ConnectionStatus;

/// Records every utterance; used by tests.
#[derive(Debug)]
pub struct MemoryChannel {
    sent: Mutex<Vec<String>>,
    status: watch::Sender<ConnectionStatus>,
    failing: AtomicBool,
    send_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryChannel {
    pub fn new(status: ConnectionStatus) -> Arc<Self> {
        let (status, _) = watch::channel(status);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            status,
            failing: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::new(ConnectionStatus::Connected)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every send takes this long to complete.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    /// Most sends ever observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechChannel for MemoryChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("injected failure".to_string()));
        }
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        self.sent.lock().unwrap().push(text.to_string());

        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::downstream::{ChannelError, SpeechChannel};
use crate::protocol::{ConnectionStatus, TurnKind};
use crate::segmenter::UtteranceChunk;
use crate::settings::LiveSettings;

mod pacing;
mod queue;
mod turn_log;

pub use pacing::{inter_utterance_delay, PacingConfig};
pub use queue::UtteranceQueue;
pub use turn_log::TurnLog;

/// Timestamp of the most recent dispatch. Shared between the dispatch loop,
/// the ingestor and the idle watchdog.
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<Instant>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    #[cfg(test)]
    pub fn set(&self, at: Instant) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn last(&self) -> Instant {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last())
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

struct ProcessingPermit<'a>(&'a AtomicBool);

impl Drop for ProcessingPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Pipeline {
    session_id: String,
    queue: UtteranceQueue,
    processing: AtomicBool,
    pre_roll: AtomicBool,
    activity: ActivityClock,
    turns: TurnLog,
    dispatched: AtomicUsize,
    channel: Arc<dyn SpeechChannel>,
    status: watch::Receiver<ConnectionStatus>,
    settings: watch::Receiver<LiveSettings>,
    pacing: PacingConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Fresh per-connection state: empty queue, idle loop, activity clock at
    /// now and the pre-roll armed.
    pub fn new(
        session_id: impl Into<String>,
        channel: Arc<dyn SpeechChannel>,
        settings: watch::Receiver<LiveSettings>,
        pacing: PacingConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let status = channel.status();
        Arc::new(Self {
            session_id: session_id.into(),
            queue: UtteranceQueue::new(),
            processing: AtomicBool::new(false),
            pre_roll: AtomicBool::new(true),
            activity: ActivityClock::new(),
            turns: TurnLog::new(),
            dispatched: AtomicUsize::new(0),
            channel,
            status,
            settings,
            pacing,
            cancel,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }

    pub fn turns(&self) -> &TurnLog {
        &self.turns
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pre_roll_pending(&self) -> bool {
        self.pre_roll.load(Ordering::SeqCst)
    }

    pub fn discard_pending(&self) -> usize {
        self.queue.clear()
    }

    /// Appends one record's chunks as a contiguous run.
    pub fn enqueue(&self, chunks: Vec<UtteranceChunk>) -> usize {
        self.queue.push_batch(chunks)
    }

    /// Starts the dispatch loop unless one is already running. Returns true
    /// when this call started it.
    pub fn try_start(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() || !self.acquire() {
            return false;
        }
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run().await });
        true
    }

    /// Sends a filler directive outside the queue while holding the dispatch
    /// permit. Returns `None` when the loop already holds it. The activity
    /// clock is reset whether or not the send succeeds.
    pub async fn try_send_filler(
        self: &Arc<Self>,
        directive: &str,
    ) -> Option<Result<(), ChannelError>> {
        if self.cancel.is_cancelled() || !self.acquire() {
            return None;
        }
        let result = {
            let _permit = ProcessingPermit(&self.processing);
            tracing::info!(session = %self.session_id, "dispatching filler");
            self.turns.append(TurnKind::Filler, directive);
            let result = self.channel.send(directive).await;
            self.activity.touch();
            result
        };

        // Records that arrived during the send could not start the loop.
        if !self.queue.is_empty() && self.is_connected() {
            self.try_start();
        }
        Some(result)
    }

    fn acquire(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn run(self: Arc<Self>) {
        loop {
            {
                let _permit = ProcessingPermit(&self.processing);
                if let Err(err) = self.drain().await {
                    tracing::warn!(
                        session = %self.session_id,
                        "utterance dispatch failed, dropping it: {}",
                        err
                    );
                    return;
                }
            }

            // Chunks may have landed between the last peek and the release.
            if self.cancel.is_cancelled() || self.queue.is_empty() || !self.is_connected() {
                return;
            }
            if !self.acquire() {
                return;
            }
        }
    }

    async fn drain(&self) -> Result<(), ChannelError> {
        if self.pre_roll.swap(false, Ordering::SeqCst) {
            tracing::debug!(
                session = %self.session_id,
                pre_roll_ms = self.pacing.pre_roll.as_millis() as u64,
                "pre-roll buffering"
            );
            if !self.pause(self.pacing.pre_roll).await {
                return Ok(());
            }
        }

        while self.is_connected() && !self.cancel.is_cancelled() {
            let Some(chunk) = self.queue.peek() else {
                break;
            };

            let profile = self.settings.borrow().style.profile();
            let text = if chunk.is_dialogue || chunk.has_embedded_markup {
                chunk.text.trim().to_string()
            } else {
                profile.decorate(&chunk.text)
            };
            if text.trim().is_empty() {
                self.queue.pop_front();
                continue;
            }

            tracing::info!(
                session = %self.session_id,
                style = %profile.name,
                dialogue = chunk.is_dialogue,
                remaining = self.queue.len().saturating_sub(1),
                "dispatching utterance"
            );
            self.turns.append(TurnKind::Utterance, text.as_str());
            if let Err(err) = self.channel.send(&text).await {
                self.queue.pop_front();
                return Err(err);
            }
            self.activity.touch();
            self.queue.pop_front();
            self.dispatched.fetch_add(1, Ordering::SeqCst);

            let delay =
                inter_utterance_delay(&chunk, &profile, &self.pacing, self.pacing.sample_jitter());
            if !self.pause(delay).await {
                break;
            }
        }
        Ok(())
    }

    /// Sleeps unless the session is cancelled first. Returns false on cancel.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }
}

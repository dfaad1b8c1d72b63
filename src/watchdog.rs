use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pipeline::Pipeline;
use crate::style::pick_filler;

pub const DEFAULT_WATCHDOG_PERIOD_MS: u64 = 1_000;
pub const DEFAULT_IDLE_THRESHOLD_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub period: Duration,
    pub idle_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_WATCHDOG_PERIOD_MS),
            idle_threshold: Duration::from_millis(DEFAULT_IDLE_THRESHOLD_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    Disconnected,
    Waiting,
    Filler(&'static str),
    Resumed,
}

/// Keeps the speech channel from going silent. Runs on its own timer and
/// only shares the activity clock with the dispatch loop.
pub struct IdleWatchdog {
    pipeline: Arc<Pipeline>,
    config: WatchdogConfig,
}

impl IdleWatchdog {
    pub fn new(pipeline: Arc<Pipeline>, config: WatchdogConfig) -> Self {
        Self { pipeline, config }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    pub async fn tick(&self) -> WatchdogAction {
        self.tick_at(Instant::now()).await
    }

    pub async fn tick_at(&self, now: Instant) -> WatchdogAction {
        if self.pipeline.is_cancelled() || !self.pipeline.is_connected() {
            return WatchdogAction::Disconnected;
        }

        let busy = self.pipeline.is_processing();
        if self.pipeline.queued() > 0 {
            // A loop that bailed out on a send failure leaves work behind.
            if !busy && self.pipeline.try_start() {
                tracing::debug!(session = %self.pipeline.session_id(), "watchdog resumed dispatch");
                return WatchdogAction::Resumed;
            }
            return WatchdogAction::Waiting;
        }

        let idle = self.pipeline.activity().elapsed_at(now);
        if busy || idle <= self.config.idle_threshold {
            return WatchdogAction::Waiting;
        }

        let directive = pick_filler();
        tracing::info!(
            session = %self.pipeline.session_id(),
            idle_ms = idle.as_millis() as u64,
            "feed idle, injecting filler"
        );
        match self.pipeline.try_send_filler(directive).await {
            None => return WatchdogAction::Waiting,
            Some(Err(err)) => {
                tracing::warn!(session = %self.pipeline.session_id(), "filler dispatch failed: {}", err);
            }
            Some(Ok(())) => {}
        }
        WatchdogAction::Filler(directive)
    }
}

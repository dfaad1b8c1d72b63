use std::time::Duration;

use rand::Rng;

use crate::segmenter::UtteranceChunk;
use crate::style::StyleProfile;

pub const DEFAULT_PRE_ROLL_MS: u64 = 4_000;
pub const DEFAULT_DIALOGUE_DELAY_MS: u64 = 150;
pub const DEFAULT_MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub pre_roll: Duration,
    pub dialogue_base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            pre_roll: Duration::from_millis(DEFAULT_PRE_ROLL_MS),
            dialogue_base_delay: Duration::from_millis(DEFAULT_DIALOGUE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl PacingConfig {
    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

pub fn estimated_speech_duration(chunk: &UtteranceChunk, profile: &StyleProfile) -> Duration {
    let rate = profile.reading_rate_words_per_second;
    if !rate.is_finite() || rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f32(chunk.word_count() as f32 / rate)
}

/// Time to wait after dispatching `chunk` before the next one. Measured on the
/// undecorated chunk text.
pub fn inter_utterance_delay(
    chunk: &UtteranceChunk,
    profile: &StyleProfile,
    pacing: &PacingConfig,
    jitter: Duration,
) -> Duration {
    let base = if chunk.is_dialogue {
        pacing.dialogue_base_delay
    } else {
        profile.base_inter_utterance_delay
    };
    estimated_speech_duration(chunk, profile) + base + jitter.min(pacing.max_jitter)
}

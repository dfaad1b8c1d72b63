use std::env;
use std::time::Duration;

use url::Url;

use crate::downstream::SpeechTarget;
use crate::pipeline::PacingConfig;
use crate::segmenter::{SegmenterConfig, SentenceSplitter, DEFAULT_HARD_LIMIT, DEFAULT_SOFT_LIMIT};
use crate::settings::{SupportedLanguages, DEFAULT_SUPPORTED_LANGUAGES};
use crate::style::StyleName;
use crate::upstream::HttpSourceConfig;
use crate::watchdog::{WatchdogConfig, DEFAULT_IDLE_THRESHOLD_MS, DEFAULT_WATCHDOG_PERIOD_MS};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_PUSH_RETRY_MS: u64 = 3_000;
const DEFAULT_SPEECH_RECONNECT_MS: u64 = 2_000;
const DEFAULT_SOURCE_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field} url '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("segment soft limit {soft} exceeds hard limit {hard}")]
    SegmentLimits { soft: usize, hard: usize },
    #[error("no supported languages configured")]
    NoLanguages,
    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub source: HttpSourceConfig,
    pub speech: SpeechTarget,
    pub speech_reconnect: Duration,
    pub style: StyleName,
    pub language: String,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn default_bind() -> String {
        "127.0.0.1:7880".to_string()
    }

    pub fn new(
        bind_addr: String,
        poll_url: &str,
        push_url: Option<&str>,
        speech_url: Option<&str>,
        style: StyleName,
        language: &str,
    ) -> Result<Self, ConfigError> {
        let session = SessionConfig::from_env()?;
        let language = session
            .languages
            .resolve(language)
            .ok_or_else(|| ConfigError::UnsupportedLanguage(language.to_string()))?;
        let speech = match speech_url {
            Some(url) => SpeechTarget::WebSocket(parse_url("speech", url)?),
            None => SpeechTarget::Console,
        };

        Ok(Self {
            bind_addr,
            source: HttpSourceConfig {
                poll_url: parse_url("poll", poll_url)?,
                push_url: push_url.map(|url| parse_url("push", url)).transpose()?,
                timeout: Duration::from_secs(env_u64(
                    "SOURCE_TIMEOUT_SECONDS",
                    DEFAULT_SOURCE_TIMEOUT_SECONDS,
                )),
            },
            speech,
            speech_reconnect: env_duration_ms("SPEECH_RECONNECT_MS", DEFAULT_SPEECH_RECONNECT_MS),
            style,
            language,
            session,
        })
    }
}

/// Tunables for one connection's pipeline.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub push_retry: Duration,
    pub pacing: PacingConfig,
    pub watchdog: WatchdogConfig,
    pub segmenter: SegmenterConfig,
    pub languages: SupportedLanguages,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            push_retry: Duration::from_millis(DEFAULT_PUSH_RETRY_MS),
            pacing: PacingConfig::default(),
            watchdog: WatchdogConfig::default(),
            segmenter: SegmenterConfig::default(),
            languages: SupportedLanguages::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PacingConfig::default();
        let splitter = match env_optional_string("SENTENCE_SPLITTER") {
            Some(value) => value
                .parse::<SentenceSplitter>()
                .map_err(ConfigError::Invalid)?,
            None => SentenceSplitter::default(),
        };

        let config = Self {
            poll_interval: env_duration_ms("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            push_retry: env_duration_ms("PUSH_RETRY_MS", DEFAULT_PUSH_RETRY_MS),
            pacing: PacingConfig {
                pre_roll: env_duration_ms("PRE_ROLL_MS", defaults.pre_roll.as_millis() as u64),
                dialogue_base_delay: env_duration_ms(
                    "DIALOGUE_DELAY_MS",
                    defaults.dialogue_base_delay.as_millis() as u64,
                ),
                max_jitter: env_duration_ms("MAX_JITTER_MS", defaults.max_jitter.as_millis() as u64),
            },
            watchdog: WatchdogConfig {
                period: env_duration_ms("WATCHDOG_PERIOD_MS", DEFAULT_WATCHDOG_PERIOD_MS),
                idle_threshold: env_duration_ms("IDLE_THRESHOLD_MS", DEFAULT_IDLE_THRESHOLD_MS),
            },
            segmenter: SegmenterConfig {
                soft_limit: env_usize("SEGMENT_SOFT_LIMIT", DEFAULT_SOFT_LIMIT),
                hard_limit: env_usize("SEGMENT_HARD_LIMIT", DEFAULT_HARD_LIMIT),
                splitter,
            },
            languages: SupportedLanguages::parse_list(&env_string(
                "SUPPORTED_LANGUAGES",
                DEFAULT_SUPPORTED_LANGUAGES,
            )),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segmenter.soft_limit > self.segmenter.hard_limit {
            return Err(ConfigError::SegmentLimits {
                soft: self.segmenter.soft_limit,
                hard: self.segmenter.hard_limit,
            });
        }
        if self.languages.is_empty() {
            return Err(ConfigError::NoLanguages);
        }
        if self.poll_interval.is_zero() || self.watchdog.period.is_zero() {
            return Err(ConfigError::Invalid(
                "poll interval and watchdog period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_optional_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

pub(crate) fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_segment_limits() {
        let mut config = SessionConfig::default();
        config.segmenter.soft_limit = 500;
        config.segmenter.hard_limit = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SegmentLimits { soft: 500, hard: 100 })
        ));
    }

    #[test]
    fn rejects_empty_language_set() {
        let config = SessionConfig {
            languages: SupportedLanguages::parse_list(" , "),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoLanguages)));
    }

    #[test]
    fn reports_bad_urls() {
        let err = parse_url("poll", "not a url").unwrap_err();
        assert!(err.to_string().starts_with("invalid poll url"));
    }
}

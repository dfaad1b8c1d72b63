use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::env_flag;
use crate::protocol::RawRecord;

mod http;
#[cfg(test)]
pub mod memory;

pub use http::{HttpRecordSource, HttpSourceConfig};

const MAX_RETRY_ATTEMPTS: usize = 4;
const RETRY_BACKOFF_BASE_MS: u64 = 200;

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<RawRecord, SourceError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("record request failed: {0}")]
    Request(String),
    #[error("record source returned status {0}")]
    Status(u16),
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("push subscription failed: {0}")]
    Subscribe(String),
    #[error("push notifications are not configured")]
    PushUnavailable,
}

/// The external mutable record the narration is read from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Latest record, or `None` when the source has nothing yet.
    async fn fetch_latest(&self) -> Result<Option<RawRecord>, SourceError>;

    /// Change notifications. The stream ends when the subscription drops.
    async fn subscribe(&self) -> Result<RecordStream, SourceError>;
}

fn retry_backoff_duration(attempt: usize) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1);
    Duration::from_millis(RETRY_BACKOFF_BASE_MS.saturating_mul(factor))
}

pub(crate) async fn send_with_retry<F>(mut build: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let debug_urls = env_flag("DEBUG_URLS");
    let mut attempt = 0;
    loop {
        attempt += 1;
        let builder = build();
        if debug_urls {
            if let Some(request) = builder.try_clone().and_then(|clone| clone.build().ok()) {
                info!(method = %request.method(), url = %request.url(), attempt, "sending request");
            }
        }
        let response = builder.send().await?;
        if response.status().is_server_error() && attempt < MAX_RETRY_ATTEMPTS {
            warn!(
                status = %response.status(),
                attempt,
                max_attempts = MAX_RETRY_ATTEMPTS,
                "record request failed with 5xx, retrying"
            );
            sleep(retry_backoff_duration(attempt)).await;
            continue;
        }
        return Ok(response);
    }
}

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, StreamExt};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::protocol::RawRecord;
use crate::upstream::{send_with_retry, RecordSource, RecordStream, SourceError};

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub poll_url: Url,
    pub push_url: Option<Url>,
    pub timeout: Duration,
}

/// Polls the record over HTTP and subscribes to pushes over a WebSocket that
/// delivers one JSON record per frame.
#[derive(Debug)]
pub struct HttpRecordSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpRecordSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("speakstream/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|err| SourceError::Request(err.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_latest(&self) -> Result<Option<RawRecord>, SourceError> {
        let response = send_with_retry(|| {
            self.client
                .get(self.config.poll_url.clone())
                .header(ACCEPT, "application/json")
        })
        .await
        .map_err(|err| SourceError::Request(err.to_string()))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(SourceError::Status(status.as_u16())),
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        decode_record(&body).map(Some)
    }

    async fn subscribe(&self) -> Result<RecordStream, SourceError> {
        let url = self
            .config
            .push_url
            .as_ref()
            .ok_or(SourceError::PushUnavailable)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| SourceError::Subscribe(err.to_string()))?;
        tracing::info!(url = %url, "push subscription open");

        let stream = socket.filter_map(|message| future::ready(decode_frame(message)));
        Ok(Box::pin(stream))
    }
}

fn decode_record(payload: &[u8]) -> Result<RawRecord, SourceError> {
    // Some sources wrap the record as `{"record": {...}}`.
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|err| SourceError::Decode(err.to_string()))?;
    let record = match value {
        serde_json::Value::Object(mut object) if object.contains_key("record") => {
            object.remove("record").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(record).map_err(|err| SourceError::Decode(err.to_string()))
}

fn decode_frame(
    message: Result<Message, tungstenite::Error>,
) -> Option<Result<RawRecord, SourceError>> {
    match message {
        Ok(Message::Text(text)) => Some(decode_record(text.as_bytes())),
        Ok(Message::Binary(data)) => Some(decode_record(&data)),
        Ok(_) => None,
        Err(err) => Some(Err(SourceError::Subscribe(err.to_string()))),
    }
}

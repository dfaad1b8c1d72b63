use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::protocol::RawRecord;
use crate::upstream::{RecordSource, SourceError};

/// Forwards change notifications for as long as the session lives,
/// resubscribing after `retry` whenever the subscription drops.
pub async fn run(
    source: Arc<dyn RecordSource>,
    records: mpsc::Sender<RawRecord>,
    retry: Duration,
    cancel: CancellationToken,
) {
    loop {
        let subscription = tokio::select! {
            _ = cancel.cancelled() => return,
            result = source.subscribe() => result,
        };

        match subscription {
            Ok(mut stream) => loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(record)) => {
                        if records.send(record).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!("ignoring bad push notification: {}", err);
                    }
                    None => {
                        tracing::info!("push subscription closed");
                        break;
                    }
                }
            },
            Err(SourceError::PushUnavailable) => {
                tracing::debug!("push notifications unavailable; polling only");
                return;
            }
            Err(err) => {
                tracing::warn!("push subscription failed: {}", err);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(retry) => {}
        }
    }
}

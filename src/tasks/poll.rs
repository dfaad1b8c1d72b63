use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol::RawRecord;
use crate::upstream::RecordSource;

/// Fetches the latest record on a fixed interval. The first tick fires
/// immediately, which covers records that existed before the session began.
pub async fn run(
    source: Arc<dyn RecordSource>,
    records: mpsc::Sender<RawRecord>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.fetch_latest() => result,
        };
        match result {
            Ok(Some(record)) => {
                if records.send(record).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("record poll failed, retrying next tick: {}", err);
            }
        }
    }
}

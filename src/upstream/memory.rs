use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::protocol::RawRecord;
use crate::upstream::{RecordSource, RecordStream, SourceError};

/// In-memory record source for tests. Pushes are delivered through the
/// sender returned by `new`; only the first subscription receives them.
#[derive(Debug)]
pub struct MemoryRecordSource {
    latest: Mutex<Option<RawRecord>>,
    pushes: Mutex<Option<mpsc::UnboundedReceiver<RawRecord>>>,
}

impl MemoryRecordSource {
    pub fn new(latest: Option<RawRecord>) -> (Self, mpsc::UnboundedSender<RawRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            latest: Mutex::new(latest),
            pushes: Mutex::new(Some(rx)),
        };
        (source, tx)
    }

    pub fn set_latest(&self, record: RawRecord) {
        *self.latest.lock().unwrap() = Some(record);
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch_latest(&self) -> Result<Option<RawRecord>, SourceError> {
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn subscribe(&self) -> Result<RecordStream, SourceError> {
        let rx = self
            .pushes
            .lock()
            .unwrap()
            .take()
            .ok_or(SourceError::PushUnavailable)?;
        let records = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|record| (Ok(record), rx))
        });
        Ok(Box::pin(records))
    }
}

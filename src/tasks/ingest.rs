use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ingest::Ingestor;
use crate::protocol::RawRecord;

pub async fn run(
    mut ingestor: Ingestor,
    mut records: mpsc::Receiver<RawRecord>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            record = records.recv() => {
                let Some(record) = record else {
                    break;
                };
                let outcome = ingestor.on_record(&record);
                tracing::debug!(record = %record.id, ?outcome, "record handled");
            }
        }
    }
    tracing::debug!(last_record = ?ingestor.last_id(), "ingest stopped");
}

use std::sync::Arc;

use tokio::sync::watch;

use crate::pipeline::Pipeline;
use crate::protocol::RawRecord;
use crate::segmenter::{segment_with, SegmenterConfig};
use crate::settings::{LiveSettings, SupportedLanguages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Duplicate,
    Empty,
    NoChunks,
    Enqueued(usize),
}

/// Turns upstream records into queued chunks for one session. Poll ticks
/// and push notifications are funnelled into a single task that owns this,
/// so records are handled one at a time.
pub struct Ingestor {
    pipeline: Arc<Pipeline>,
    settings: Arc<watch::Sender<LiveSettings>>,
    languages: SupportedLanguages,
    segmenter: SegmenterConfig,
    last_id: Option<String>,
}

impl Ingestor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        settings: Arc<watch::Sender<LiveSettings>>,
        languages: SupportedLanguages,
        segmenter: SegmenterConfig,
    ) -> Self {
        Self {
            pipeline,
            settings,
            languages,
            segmenter,
            last_id: None,
        }
    }

    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    pub fn on_record(&mut self, record: &RawRecord) -> IngestOutcome {
        if self.last_id.as_deref() == Some(record.id.as_str()) {
            return IngestOutcome::Duplicate;
        }

        let outcome = match record.speakable_text() {
            None => IngestOutcome::Empty,
            Some(text) => {
                self.apply_language(record);
                let chunks = segment_with(text, &self.segmenter);
                if chunks.is_empty() {
                    IngestOutcome::NoChunks
                } else {
                    let count = chunks.len();
                    let queued = self.pipeline.enqueue(chunks);
                    self.pipeline.activity().touch();
                    self.pipeline.try_start();
                    tracing::debug!(
                        session = %self.pipeline.session_id(),
                        record = %record.id,
                        chunks = count,
                        queued,
                        pre_roll = self.pipeline.pre_roll_pending(),
                        "record enqueued"
                    );
                    IngestOutcome::Enqueued(count)
                }
            }
        };

        self.last_id = Some(record.id.clone());
        outcome
    }

    fn apply_language(&self, record: &RawRecord) {
        let current = self.settings.borrow().language.clone();
        let target = record
            .target_language
            .as_deref()
            .and_then(|value| self.languages.resolve(value))
            .filter(|target| *target != current);

        if let Some(target) = target {
            tracing::info!(from = %current, to = %target, "auto-detected output language");
            self.settings.send_modify(|settings| {
                settings.language = target;
                settings.language_auto_detected = true;
            });
        } else if let Some(label) = record
            .source_language_label
            .as_deref()
            .and_then(|value| self.languages.resolve(value))
        {
            self.settings.send_if_modified(|settings| {
                if settings.detected_source_label.as_deref() == Some(label.as_str()) {
                    return false;
                }
                settings.detected_source_label = Some(label);
                true
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::downstream::memory::MemoryChannel;
    use crate::downstream::SpeechChannel;
    use crate::pipeline::PacingConfig;
    use crate::style::StyleName;

    struct Harness {
        channel: Arc<MemoryChannel>,
        pipeline: Arc<Pipeline>,
        settings: Arc<watch::Sender<LiveSettings>>,
        ingestor: Ingestor,
    }

    fn harness(pre_roll: Duration) -> Harness {
        let channel = MemoryChannel::connected();
        let (settings_tx, settings_rx) =
            watch::channel(LiveSettings::new(StyleName::Energetic, "en"));
        let settings = Arc::new(settings_tx);
        let dyn_channel: Arc<dyn SpeechChannel> = channel.clone();
        let pipeline = Pipeline::new(
            "test",
            dyn_channel,
            settings_rx,
            PacingConfig {
                pre_roll,
                max_jitter: Duration::ZERO,
                ..PacingConfig::default()
            },
            CancellationToken::new(),
        );
        let ingestor = Ingestor::new(
            pipeline.clone(),
            settings.clone(),
            SupportedLanguages::parse_list("en,es,fr"),
            SegmenterConfig::default(),
        );
        Harness {
            channel,
            pipeline,
            settings,
            ingestor,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_id_is_enqueued_once() {
        let mut h = harness(Duration::from_secs(4));
        let record = RawRecord::new("r1", "Hello there. How are you?");

        assert!(matches!(h.ingestor.on_record(&record), IngestOutcome::Enqueued(_)));
        let queued = h.pipeline.queued();
        assert!(queued > 0);

        assert_eq!(h.ingestor.on_record(&record), IngestOutcome::Duplicate);
        assert_eq!(h.pipeline.queued(), queued);
        assert_eq!(h.ingestor.last_id(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn translation_is_preferred_over_source() {
        let mut h = harness(Duration::ZERO);
        let mut record = RawRecord::new("r1", "Hola a todos.");
        record.translated_text = Some("Hello everyone.".to_string());

        h.ingestor.on_record(&record);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.channel.sent(), vec!["Hello everyone."]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_records_are_ignored() {
        let mut h = harness(Duration::ZERO);
        let record = RawRecord::new("r1", "   ");
        assert_eq!(h.ingestor.on_record(&record), IngestOutcome::Empty);
        assert_eq!(h.pipeline.queued(), 0);
        assert!(!h.pipeline.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn records_from_separate_updates_keep_order() {
        let mut h = harness(Duration::ZERO);
        let config = SegmenterConfig {
            soft_limit: 1,
            ..SegmenterConfig::default()
        };
        h.ingestor.segmenter = config;

        h.ingestor.on_record(&RawRecord::new("r1", "A one. B two. C three."));
        h.ingestor.on_record(&RawRecord::new("r2", "D four. E five."));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            h.channel.sent(),
            vec!["A one.", "B two.", "C three.", "D four.", "E five."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn supported_target_language_switches_output() {
        let mut h = harness(Duration::from_secs(4));
        let mut record = RawRecord::new("r1", "Bonjour.");
        record.target_language = Some("ES".to_string());
        h.ingestor.on_record(&record);

        let settings = h.settings.borrow().clone();
        assert_eq!(settings.language, "es");
        assert!(settings.language_auto_detected);
    }

    #[tokio::test(start_paused = true)]
    async fn source_label_is_recorded_without_switching() {
        let mut h = harness(Duration::from_secs(4));
        let mut record = RawRecord::new("r1", "Bonjour.");
        record.target_language = Some("xx".to_string());
        record.source_language_label = Some("fr".to_string());
        h.ingestor.on_record(&record);

        let settings = h.settings.borrow().clone();
        assert_eq!(settings.language, "en");
        assert!(!settings.language_auto_detected);
        assert_eq!(settings.detected_source_label.as_deref(), Some("fr"));
    }
}

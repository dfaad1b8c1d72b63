use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ServerConfig, SessionConfig};
use crate::downstream::{build_channel, SpeechChannel};
use crate::ingest::Ingestor;
use crate::pipeline::Pipeline;
use crate::protocol::{ConnectionStatus, ControlCommand, ControlReply, RawRecord, StatusSnapshot};
use crate::settings::LiveSettings;
use crate::tasks;
use crate::upstream::{HttpRecordSource, RecordSource};
use crate::watchdog::IdleWatchdog;

const DEFAULT_TURNS_LIMIT: usize = 20;

type ControlRequest = (ControlCommand, oneshot::Sender<ControlReply>);

struct ActiveSession {
    pipeline: Arc<Pipeline>,
    records: mpsc::Sender<RawRecord>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the per-connection session and rebuilds it on every connect.
pub struct SessionController {
    source: Arc<dyn RecordSource>,
    channel: Arc<dyn SpeechChannel>,
    settings: Arc<watch::Sender<LiveSettings>>,
    config: SessionConfig,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        source: Arc<dyn RecordSource>,
        channel: Arc<dyn SpeechChannel>,
        settings: Arc<watch::Sender<LiveSettings>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            source,
            channel,
            settings,
            config,
            active: None,
        }
    }

    async fn run(
        &mut self,
        mut control_rx: mpsc::Receiver<ControlRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut status_rx = self.channel.status();
        let initial = *status_rx.borrow_and_update();
        self.apply_status(initial);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    break;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        tracing::warn!("speech channel status closed");
                        break;
                    }
                    let status = *status_rx.borrow_and_update();
                    self.apply_status(status);
                }
                request = control_rx.recv() => {
                    let Some((command, reply)) = request else {
                        break;
                    };
                    let response = self.handle_control(command).await;
                    let _ = reply.send(response);
                }
            }
        }

        self.disconnect();
    }

    fn apply_status(&mut self, status: ConnectionStatus) {
        tracing::info!(%status, "speech channel status");
        match (status.is_connected(), self.active.is_some()) {
            (true, false) => self.connect(),
            (false, true) => self.disconnect(),
            _ => {}
        }
    }

    fn connect(&mut self) {
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(
            session_id.clone(),
            self.channel.clone(),
            self.settings.subscribe(),
            self.config.pacing,
            cancel.clone(),
        );
        let ingestor = Ingestor::new(
            pipeline.clone(),
            self.settings.clone(),
            self.config.languages.clone(),
            self.config.segmenter.clone(),
        );
        let (records_tx, records_rx) = mpsc::channel(64);
        let watchdog = IdleWatchdog::new(pipeline.clone(), self.config.watchdog);

        let tasks = vec![
            tokio::spawn(tasks::ingest::run(ingestor, records_rx, cancel.clone())),
            tokio::spawn(tasks::poll::run(
                self.source.clone(),
                records_tx.clone(),
                self.config.poll_interval,
                cancel.clone(),
            )),
            tokio::spawn(tasks::push::run(
                self.source.clone(),
                records_tx.clone(),
                self.config.push_retry,
                cancel.clone(),
            )),
            tokio::spawn(watchdog.run(cancel.clone())),
        ];

        tracing::info!(session = %session_id, "session started");
        self.active = Some(ActiveSession {
            pipeline,
            records: records_tx,
            cancel,
            tasks,
        });
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.active.take() {
            session.cancel.cancel();
            for task in session.tasks {
                task.abort();
            }
            let dropped = session.pipeline.discard_pending();
            tracing::info!(
                session = %session.pipeline.session_id(),
                dropped,
                dispatched = session.pipeline.dispatched(),
                turns = session.pipeline.turns().len(),
                "session ended"
            );
        }
    }

    async fn handle_control(&mut self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::Ping => ControlReply::Ok {
                message: "pong".to_string(),
            },
            ControlCommand::Status => ControlReply::Status {
                status: self.snapshot(),
            },
            ControlCommand::SetStyle { style } => {
                self.settings.send_modify(|settings| settings.style = style);
                tracing::info!(%style, "style changed");
                ControlReply::Ok {
                    message: format!("style set to {}", style),
                }
            }
            ControlCommand::SetLanguage { language } => {
                match self.config.languages.resolve(&language) {
                    Some(code) => {
                        self.settings.send_modify(|settings| {
                            settings.language = code.clone();
                            settings.language_auto_detected = false;
                        });
                        tracing::info!(language = %code, "language changed");
                        ControlReply::Ok {
                            message: format!("language set to {}", code),
                        }
                    }
                    None => ControlReply::Error {
                        message: format!("unsupported language '{}'", language),
                    },
                }
            }
            ControlCommand::Say { text } => {
                let Some(session) = self.active.as_ref() else {
                    return ControlReply::Error {
                        message: "speech channel not connected".to_string(),
                    };
                };
                let record = RawRecord::new(Uuid::new_v4().to_string(), text);
                match session.records.send(record).await {
                    Ok(()) => ControlReply::Ok {
                        message: "queued".to_string(),
                    },
                    Err(_) => ControlReply::Error {
                        message: "session is shutting down".to_string(),
                    },
                }
            }
            ControlCommand::Turns { limit } => {
                let turns = self
                    .active
                    .as_ref()
                    .map(|session| {
                        session
                            .pipeline
                            .turns()
                            .recent(limit.unwrap_or(DEFAULT_TURNS_LIMIT))
                    })
                    .unwrap_or_default();
                ControlReply::Turns { turns }
            }
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let settings = self.settings.borrow().clone();
        let connection = self.channel.status().borrow().to_string();
        let pipeline = self.active.as_ref().map(|session| &session.pipeline);
        StatusSnapshot {
            connection,
            session_id: pipeline.map(|pipeline| pipeline.session_id().to_string()),
            style: settings.style,
            language: settings.language,
            language_auto_detected: settings.language_auto_detected,
            detected_source_label: settings.detected_source_label,
            queued: pipeline.map(|pipeline| pipeline.queued()).unwrap_or(0),
            processing: pipeline.is_some_and(|pipeline| pipeline.is_processing()),
            dispatched: pipeline.map(|pipeline| pipeline.dispatched()).unwrap_or(0),
        }
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), String> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (control_tx, control_rx) = mpsc::channel(32);

    let source: Arc<dyn RecordSource> = Arc::new(
        HttpRecordSource::new(config.source.clone())
            .map_err(|err| format!("record source init failed: {}", err))?,
    );
    let channel = build_channel(
        config.speech.clone(),
        config.speech_reconnect,
        shutdown_rx.clone(),
    );
    let (settings_tx, _) = watch::channel(LiveSettings::new(config.style, config.language.clone()));
    let settings = Arc::new(settings_tx);

    tracing::info!(
        poll_url = %config.source.poll_url,
        push = config.source.push_url.is_some(),
        speech = ?config.speech,
        style = %config.style,
        language = %config.language,
        languages = %config.session.languages.iter().collect::<Vec<_>>().join(","),
        "starting narrator"
    );

    tokio::spawn(control_server(
        config.bind_addr.clone(),
        control_tx,
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
        }
        let _ = shutdown_tx.send(true);
    });

    let mut controller = SessionController::new(source, channel, settings, config.session);
    controller.run(control_rx, shutdown_rx).await;

    Ok(())
}

async fn control_server(
    bind_addr: String,
    control_tx: mpsc::Sender<ControlRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind {}: {}", bind_addr, err);
            return;
        }
    };
    tracing::info!("control socket listening on {}", bind_addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break;
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _)) => {
                        let tx = control_tx.clone();
                        tokio::spawn(async move { handle_connection(stream, tx).await; });
                    }
                    Err(err) => {
                        tracing::warn!("accept error: {}", err);
                    }
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, control_tx: mpsc::Sender<ControlRequest>) {
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match serde_json::from_str::<ControlCommand>(&line) {
            Ok(command) => dispatch_control(&control_tx, command).await,
            Err(err) => ControlReply::Error {
                message: format!("invalid command: {}", err),
            },
        };

        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(err) => format!("{{\"type\":\"error\",\"message\":\"{}\"}}", err),
        };

        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

async fn dispatch_control(
    control_tx: &mpsc::Sender<ControlRequest>,
    command: ControlCommand,
) -> ControlReply {
    let (reply_tx, reply_rx) = oneshot::channel();
    if control_tx.send((command, reply_tx)).await.is_err() {
        return ControlReply::Error {
            message: "narrator is shutting down".to_string(),
        };
    }
    reply_rx.await.unwrap_or_else(|_| ControlReply::Error {
        message: "narrator dropped the request".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::downstream::memory::MemoryChannel;
    use crate::pipeline::PacingConfig;
    use crate::style::StyleName;
    use crate::upstream::memory::MemoryRecordSource;
    use crate::watchdog::WatchdogConfig;

    struct Harness {
        controller: SessionController,
        channel: Arc<MemoryChannel>,
        source: Arc<MemoryRecordSource>,
        pushes: mpsc::UnboundedSender<RawRecord>,
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_secs(2),
            push_retry: Duration::from_secs(60),
            pacing: PacingConfig {
                pre_roll: Duration::from_secs(4),
                max_jitter: Duration::ZERO,
                ..PacingConfig::default()
            },
            watchdog: WatchdogConfig {
                period: Duration::from_secs(1),
                idle_threshold: Duration::from_secs(600),
            },
            ..SessionConfig::default()
        }
    }

    fn harness(latest: Option<RawRecord>) -> Harness {
        let channel = MemoryChannel::new(ConnectionStatus::Disconnected);
        let (source, pushes) = MemoryRecordSource::new(latest);
        let source = Arc::new(source);
        let (settings_tx, _) = watch::channel(LiveSettings::new(StyleName::Energetic, "en"));
        let dyn_source: Arc<dyn RecordSource> = source.clone();
        let dyn_channel: Arc<dyn SpeechChannel> = channel.clone();
        let controller = SessionController::new(
            dyn_source,
            dyn_channel,
            Arc::new(settings_tx),
            session_config(),
        );
        Harness {
            controller,
            channel,
            source,
            pushes,
        }
    }

    impl Harness {
        fn connect(&mut self) {
            self.channel.set_status(ConnectionStatus::Connected);
            self.controller.apply_status(ConnectionStatus::Connected);
        }

        fn disconnect(&mut self) {
            self.channel.set_status(ConnectionStatus::Disconnected);
            self.controller.apply_status(ConnectionStatus::Disconnected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fetches_existing_record_after_pre_roll() {
        let mut h = harness(Some(RawRecord::new("r1", "Hello there.")));
        h.connect();

        sleep(Duration::from_millis(3_900)).await;
        assert!(h.channel.sent().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.channel.sent(), vec!["Hello there."]);

        // Later polls return the same id and are absorbed.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.channel.sent(), vec!["Hello there."]);
    }

    #[tokio::test(start_paused = true)]
    async fn push_notifications_feed_the_same_session() {
        let mut h = harness(None);
        h.connect();
        h.pushes.send(RawRecord::new("p1", "Pushed line.")).unwrap();
        h.pushes.send(RawRecord::new("p1", "Pushed line.")).unwrap();

        sleep(Duration::from_secs(6)).await;
        assert_eq!(h.channel.sent(), vec!["Pushed line."]);

        h.source.set_latest(RawRecord::new("p2", "Polled line."));
        sleep(Duration::from_secs(4)).await;
        assert_eq!(h.channel.sent(), vec!["Pushed line.", "Polled line."]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_discards_session_and_reconnect_starts_fresh() {
        let mut h = harness(Some(RawRecord::new("r1", "Hello there.")));
        h.connect();
        let first = h.controller.snapshot().session_id;
        assert!(first.is_some());

        sleep(Duration::from_secs(1)).await;
        h.disconnect();
        assert!(h.controller.active.is_none());

        sleep(Duration::from_secs(10)).await;
        assert!(h.channel.sent().is_empty());

        h.connect();
        let second = h.controller.snapshot().session_id;
        assert!(second.is_some());
        assert_ne!(first, second);

        sleep(Duration::from_millis(3_900)).await;
        assert!(h.channel.sent().is_empty());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.channel.sent(), vec!["Hello there."]);
    }

    #[tokio::test(start_paused = true)]
    async fn control_commands_update_settings_and_report_status() {
        let mut h = harness(None);

        let reply = h
            .controller
            .handle_control(ControlCommand::SetStyle {
                style: StyleName::Storyteller,
            })
            .await;
        assert!(matches!(reply, ControlReply::Ok { .. }));

        let reply = h
            .controller
            .handle_control(ControlCommand::SetLanguage {
                language: "klingon".to_string(),
            })
            .await;
        assert!(matches!(reply, ControlReply::Error { .. }));

        let reply = h
            .controller
            .handle_control(ControlCommand::Say {
                text: "Hi.".to_string(),
            })
            .await;
        assert!(matches!(reply, ControlReply::Error { .. }));

        let ControlReply::Status { status } =
            h.controller.handle_control(ControlCommand::Status).await
        else {
            panic!("expected status reply");
        };
        assert_eq!(status.style, StyleName::Storyteller);
        assert_eq!(status.connection, "disconnected");
        assert!(status.session_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn say_speaks_through_active_session() {
        let mut h = harness(None);
        h.connect();

        let reply = h
            .controller
            .handle_control(ControlCommand::Say {
                text: "Live from the control socket.".to_string(),
            })
            .await;
        assert!(matches!(reply, ControlReply::Ok { .. }));

        sleep(Duration::from_secs(6)).await;
        assert_eq!(h.channel.sent(), vec!["Live from the control socket."]);

        let ControlReply::Turns { turns } = h
            .controller
            .handle_control(ControlCommand::Turns { limit: Some(5) })
            .await
        else {
            panic!("expected turns reply");
        };
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "Live from the control socket.");
    }
}

mod cli;
mod config;
mod downstream;
mod ingest;
mod orchestrator;
mod pipeline;
mod protocol;
mod segmenter;
mod settings;
mod style;
mod tasks;
mod upstream;
mod watchdog;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use crate::cli::{ClientAction, Cli, Command};
use crate::config::ServerConfig;
use crate::protocol::{ControlCommand, ControlReply, TurnKind};
use crate::segmenter::{segment, segment_with, SegmenterConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("speakstream=debug".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            bind,
            poll_url,
            push_url,
            speech_url,
            style,
            language,
        } => {
            let config = ServerConfig::new(
                bind,
                &poll_url,
                push_url.as_deref(),
                speech_url.as_deref(),
                style,
                &language,
            )?;
            orchestrator::run_server(config).await.map_err(|err| err.into())
        }
        Command::Client { addr, action } => {
            let command = match action {
                ClientAction::Ping => ControlCommand::Ping,
                ClientAction::Status => ControlCommand::Status,
                ClientAction::Style { style } => ControlCommand::SetStyle { style },
                ClientAction::Language { language } => ControlCommand::SetLanguage { language },
                ClientAction::Say { text } => ControlCommand::Say { text },
                ClientAction::Turns { limit } => ControlCommand::Turns { limit },
            };

            let reply = send_command(&addr, &command).await?;
            match reply {
                ControlReply::Ok { message } => {
                    println!("ok: {}", message);
                }
                ControlReply::Status { status } => {
                    println!(
                        "connection: {}, session: {}, style: {}, language: {}{}, queued: {}, processing: {}, dispatched: {}",
                        status.connection,
                        status.session_id.as_deref().unwrap_or("-"),
                        status.style,
                        status.language,
                        if status.language_auto_detected { " (auto)" } else { "" },
                        status.queued,
                        status.processing,
                        status.dispatched
                    );
                    if let Some(label) = status.detected_source_label {
                        println!("detected source language: {}", label);
                    }
                }
                ControlReply::Turns { turns } => {
                    for turn in turns {
                        let kind = match turn.kind {
                            TurnKind::Utterance => "utterance",
                            TurnKind::Filler => "filler",
                        };
                        println!("{} [{}] {}", turn.at.format("%H:%M:%S"), kind, turn.text);
                    }
                }
                ControlReply::Error { message } => {
                    println!("error: {}", message);
                }
            }
            Ok(())
        }
        Command::Segment { text, splitter } => {
            let chunks = match splitter {
                Some(splitter) => segment_with(
                    &text,
                    &SegmenterConfig {
                        splitter,
                        ..SegmenterConfig::default()
                    },
                ),
                None => segment(&text),
            };
            for (index, chunk) in chunks.iter().enumerate() {
                let mut flags = Vec::new();
                if chunk.is_dialogue {
                    flags.push("dialogue");
                }
                if chunk.has_embedded_markup {
                    flags.push("markup");
                }
                println!(
                    "{:>3} [{:>3} chars] {}{}",
                    index + 1,
                    chunk.text.chars().count(),
                    chunk.text,
                    if flags.is_empty() {
                        String::new()
                    } else {
                        format!("  ({})", flags.join(", "))
                    }
                );
            }
            Ok(())
        }
    }
}

async fn send_command(
    addr: &str,
    command: &ControlCommand,
) -> Result<ControlReply, Box<dyn std::error::Error>> {
    let mut request = serde_json::to_vec(command)?;
    request.push(b'\n');

    let mut stream = BufReader::new(TcpStream::connect(addr).await?);
    stream.get_mut().write_all(&request).await?;

    let mut reply = String::new();
    if stream.read_line(&mut reply).await? == 0 {
        return Err(format!("{} closed the connection without replying", addr).into());
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

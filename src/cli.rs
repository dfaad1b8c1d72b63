use clap::{Parser, Subcommand};

use crate::config::ServerConfig;
use crate::segmenter::SentenceSplitter;
use crate::style::StyleName;

#[derive(Parser, Debug)]
#[command(name = "speakstream", version, about = "Live narration relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Poll the record source and narrate it to the speech channel")]
    Run {
        #[arg(long, default_value_t = ServerConfig::default_bind())]
        bind: String,
        #[arg(long, env = "POLL_URL")]
        poll_url: String,
        #[arg(long, env = "PUSH_URL")]
        push_url: Option<String>,
        #[arg(long, env = "SPEECH_URL", help = "ws:// endpoint; logs to the console when unset")]
        speech_url: Option<String>,
        #[arg(long, env = "NARRATION_STYLE", default_value_t = StyleName::default())]
        style: StyleName,
        #[arg(long, env = "OUTPUT_LANGUAGE", default_value = "en")]
        language: String,
    },
    Client {
        #[arg(long, default_value_t = ServerConfig::default_bind())]
        addr: String,
        #[command(subcommand)]
        action: ClientAction,
    },
    #[command(about = "Print the utterance chunks for a piece of text")]
    Segment {
        text: String,
        #[arg(long)]
        splitter: Option<SentenceSplitter>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClientAction {
    Ping,
    #[command(about = "Fetch connection, session and queue state")]
    Status,
    Style { style: StyleName },
    Language { language: String },
    #[command(about = "Narrate a line through the active session")]
    Say { text: String },
    Turns {
        #[arg(long)]
        limit: Option<usize>,
    },
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::style::StyleName;

/// Latest state of the upstream text source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: String,
    #[serde(default)]
    pub source_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            source_language_label: None,
            translated_text: None,
            target_language: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// Text to speak: a non-empty translation wins over the source text.
    pub fn speakable_text(&self) -> Option<&str> {
        self.translated_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or_else(|| Some(self.source_text.as_str()).filter(|text| !text.trim().is_empty()))
    }
}

// Upstream ids are opaque; some sources send integers.
fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RecordId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RecordId::deserialize(deserializer)? {
        RecordId::Text(value) => value,
        RecordId::Signed(value) => value.to_string(),
        RecordId::Unsigned(value) => value.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Utterance,
    Filler,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub kind: TurnKind,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Ping,
    Status,
    SetStyle { style: StyleName },
    SetLanguage { language: String },
    Say { text: String },
    Turns { limit: Option<usize> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connection: String,
    pub session_id: Option<String>,
    pub style: StyleName,
    pub language: String,
    pub language_auto_detected: bool,
    pub detected_source_label: Option<String>,
    pub queued: usize,
    pub processing: bool,
    pub dispatched: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Ok { message: String },
    Status { status: StatusSnapshot },
    Turns { turns: Vec<TurnEntry> },
    Error { message: String },
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleName {
    #[default]
    Calm,
    Storyteller,
    Energetic,
    Newscaster,
}

impl StyleName {
    pub const ALL: [StyleName; 4] = [
        StyleName::Calm,
        StyleName::Storyteller,
        StyleName::Energetic,
        StyleName::Newscaster,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StyleName::Calm => "calm",
            StyleName::Storyteller => "storyteller",
            StyleName::Energetic => "energetic",
            StyleName::Newscaster => "newscaster",
        }
    }

    pub fn profile(self) -> StyleProfile {
        match self {
            StyleName::Calm => StyleProfile {
                name: self,
                reading_rate_words_per_second: 2.4,
                base_inter_utterance_delay: Duration::from_millis(900),
            },
            StyleName::Storyteller => StyleProfile {
                name: self,
                reading_rate_words_per_second: 2.0,
                base_inter_utterance_delay: Duration::from_millis(1200),
            },
            StyleName::Energetic => StyleProfile {
                name: self,
                reading_rate_words_per_second: 3.2,
                base_inter_utterance_delay: Duration::from_millis(350),
            },
            StyleName::Newscaster => StyleProfile {
                name: self,
                reading_rate_words_per_second: 2.8,
                base_inter_utterance_delay: Duration::from_millis(600),
            },
        }
    }
}

impl fmt::Display for StyleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StyleName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        StyleName::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| format!("unknown style '{}'", value.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleProfile {
    pub name: StyleName,
    pub reading_rate_words_per_second: f32,
    pub base_inter_utterance_delay: Duration,
}

impl StyleProfile {
    /// Wraps plain narration in the delivery cues of this style. Returns an
    /// empty string for blank input so callers can drop it.
    pub fn decorate(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }
        match self.name {
            StyleName::Calm => format!("[breath] {}", text),
            StyleName::Storyteller => format!("[breath] <slow>{}</slow>", text),
            StyleName::Energetic => text.to_string(),
            StyleName::Newscaster => format!("{} [pause]", text),
        }
    }
}

pub const FILLER_DIRECTIVES: &[&str] = &[
    "[Directive: the feed is quiet. Do a short shoutout segment for everyone listening right now, then wait for the next update.]",
    "[Directive: do a quick real-talk segment. Share one honest thought about what has been said so far, in two or three sentences.]",
    "[Directive: recap the last few updates in one or two sentences so late listeners can catch up.]",
    "[Directive: tease what might come next. Keep it light and under three sentences.]",
    "[Directive: thank the audience for sticking around and invite them to stay tuned.]",
    "[Directive: do a short behind-the-scenes aside about how live narration works, then pause.]",
    "[Directive: pick one word from the recent updates and riff on it briefly.]",
    "[Directive: ask the audience a rhetorical question about the story so far, then let it breathe.]",
];

pub fn pick_filler() -> &'static str {
    FILLER_DIRECTIVES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FILLER_DIRECTIVES[0])
}

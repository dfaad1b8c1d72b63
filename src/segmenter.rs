use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_SOFT_LIMIT: usize = 220;
pub const DEFAULT_HARD_LIMIT: usize = 400;

const ABBREVIATION_MASK: char = '\u{E000}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceChunk {
    pub text: String,
    pub is_dialogue: bool,
    pub has_embedded_markup: bool,
}

impl UtteranceChunk {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            is_dialogue: is_dialogue_line(&text),
            has_embedded_markup: has_inline_markup(&text),
            text,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SentenceSplitter {
    /// UAX #29 sentence boundaries.
    #[default]
    Unicode,
    /// Punctuation regex.
    Pattern,
}

impl FromStr for SentenceSplitter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "unicode" | "uax29" => Ok(SentenceSplitter::Unicode),
            "pattern" | "regex" => Ok(SentenceSplitter::Pattern),
            other => Err(format!("unknown sentence splitter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub soft_limit: usize,
    pub hard_limit: usize,
    pub splitter: SentenceSplitter,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            soft_limit: DEFAULT_SOFT_LIMIT,
            hard_limit: DEFAULT_HARD_LIMIT,
            splitter: SentenceSplitter::default(),
        }
    }
}

pub fn segment(text: &str) -> Vec<UtteranceChunk> {
    segment_with(text, &SegmenterConfig::default())
}

pub fn segment_with(text: &str, config: &SegmenterConfig) -> Vec<UtteranceChunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for sentence in split_sentences(text, config.splitter) {
        let sentence_len = sentence.chars().count();
        if buffer.is_empty() {
            buffer.push_str(&sentence);
            buffer_len = sentence_len;
            continue;
        }

        let starts_new_speaker = is_dialogue_line(&sentence);
        let would_overflow = buffer_len + 1 + sentence_len > config.hard_limit;
        if starts_new_speaker || would_overflow || buffer_len > config.soft_limit {
            flush_chunk(&mut buffer, &mut chunks);
            buffer.push_str(&sentence);
            buffer_len = sentence_len;
        } else {
            buffer.push(' ');
            buffer.push_str(&sentence);
            buffer_len += 1 + sentence_len;
        }
    }
    flush_chunk(&mut buffer, &mut chunks);

    chunks
}

fn flush_chunk(buffer: &mut String, chunks: &mut Vec<UtteranceChunk>) {
    let text = buffer.trim();
    if !text.is_empty() {
        chunks.push(UtteranceChunk::new(text));
    }
    buffer.clear();
}

/// Splits text into trimmed, non-empty sentences. Abbreviation periods are
/// masked for the duration of the split so `Mr. Smith` stays whole.
pub fn split_sentences(text: &str, splitter: SentenceSplitter) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let masked = mask_abbreviations(text);
    let pieces: Vec<&str> = match splitter {
        SentenceSplitter::Unicode => masked.unicode_sentences().collect(),
        SentenceSplitter::Pattern => split_on_punctuation(&masked),
    };

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .map(unmask_abbreviations)
        .collect()
}

fn split_on_punctuation(text: &str) -> Vec<&str> {
    static BOUNDARY_RE: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY_RE
        .get_or_init(|| Regex::new(r#"[.!?…]+["'”’)\]]*\s+|\n\s*"#).unwrap());

    let mut pieces = Vec::new();
    let mut start = 0;
    for found in boundary.find_iter(text) {
        pieces.push(&text[start..found.end()]);
        start = found.end();
    }
    pieces.push(&text[start..]);
    pieces
}

fn mask_abbreviations(text: &str) -> String {
    static ABBREVIATION_RE: OnceLock<Regex> = OnceLock::new();
    let abbreviations = ABBREVIATION_RE.get_or_init(|| {
        Regex::new(r"\b(?:Mrs|Mr|Ms|Dr|St|Jr|Sr|vs|etc|No)\.|\b(?:e\.g|i\.e)\.").unwrap()
    });

    abbreviations
        .replace_all(text, |caps: &Captures| {
            caps[0].replace('.', &ABBREVIATION_MASK.to_string())
        })
        .into_owned()
}

fn unmask_abbreviations(sentence: &str) -> String {
    sentence.replace(ABBREVIATION_MASK, ".")
}

/// True when the line opens with a speaker prefix: one to four capitalized
/// tokens followed directly by a colon.
pub fn is_dialogue_line(text: &str) -> bool {
    static SPEAKER_RE: OnceLock<Regex> = OnceLock::new();
    let speaker = SPEAKER_RE.get_or_init(|| {
        Regex::new(r"^\p{Lu}[\p{L}\p{M}'’.\-]*(?:[ \t]+\p{Lu}[\p{L}\p{M}'’.\-]*){0,3}:(?:\s|$)")
            .unwrap()
    });
    speaker.is_match(text.trim_start())
}

/// True when the text already carries delivery cues such as `[laughs]` or
/// `<slow>...</slow>`.
pub fn has_inline_markup(text: &str) -> bool {
    static MARKUP_RE: OnceLock<Regex> = OnceLock::new();
    let markup = MARKUP_RE.get_or_init(|| {
        Regex::new(r"\[[A-Za-z][\w \-]*\]|</?[A-Za-z][\w\-]*(?:\s[^<>]*)?/?>").unwrap()
    });
    markup.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[UtteranceChunk]) -> Vec<&str> {
        chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    #[test]
    fn blank_input_yields_nothing() {
        assert!(segment("").is_empty());
        assert!(segment("   ").is_empty());
        let pattern = SegmenterConfig {
            splitter: SentenceSplitter::Pattern,
            ..SegmenterConfig::default()
        };
        assert!(segment_with("\n\t ", &pattern).is_empty());
    }

    #[test]
    fn speaker_change_forces_flush() {
        for splitter in [SentenceSplitter::Unicode, SentenceSplitter::Pattern] {
            let config = SegmenterConfig {
                splitter,
                ..SegmenterConfig::default()
            };
            let chunks = segment_with("Hello there. Maria: I am here.", &config);
            assert!(chunks.len() >= 2, "{:?}", splitter);
            assert_eq!(chunks[0].text, "Hello there.");
            assert_eq!(chunks[1].text, "Maria: I am here.");
            assert!(chunks[1].is_dialogue);
            assert!(!chunks[0].is_dialogue);
        }
    }

    #[test]
    fn short_sentences_fold_until_soft_limit() {
        let config = SegmenterConfig {
            soft_limit: 20,
            hard_limit: 100,
            splitter: SentenceSplitter::Pattern,
        };
        let chunks = segment_with("One two three. Four five six. Seven eight. Nine.", &config);
        assert_eq!(
            texts(&chunks),
            vec!["One two three. Four five six.", "Seven eight. Nine."]
        );
    }

    #[test]
    fn chunks_respect_hard_limit_unless_single_sentence() {
        let config = SegmenterConfig {
            soft_limit: 80,
            hard_limit: 120,
            splitter: SentenceSplitter::Pattern,
        };
        let long_sentence = format!("{}end.", "word ".repeat(40));
        let text = format!(
            "The first sentence is short. The second one is a little longer than that. {} \
             Then a short one. And another short one follows here. Finally we stop.",
            long_sentence
        );
        let sentences = split_sentences(&text, config.splitter);
        let chunks = segment_with(&text, &config);

        assert!(chunks.iter().any(|chunk| chunk.text == long_sentence));
        for chunk in &chunks {
            let fits = chunk.text.chars().count() <= config.hard_limit;
            let single = sentences.iter().any(|sentence| *sentence == chunk.text);
            assert!(fits || single, "oversized chunk: {}", chunk.text);
        }
    }

    #[test]
    fn oversized_sentence_is_emitted_unmodified() {
        let config = SegmenterConfig {
            soft_limit: 10,
            hard_limit: 20,
            splitter: SentenceSplitter::Unicode,
        };
        let sentence = "This single sentence is far longer than twenty characters.";
        let chunks = segment_with(sentence, &config);
        assert_eq!(texts(&chunks), vec![sentence]);
    }

    #[test]
    fn pattern_splitter_keeps_abbreviations() {
        let sentences = split_sentences(
            "Mr. Smith arrived, e.g. early! Did he? Yes.",
            SentenceSplitter::Pattern,
        );
        assert_eq!(sentences, vec!["Mr. Smith arrived, e.g. early!", "Did he?", "Yes."]);
    }

    #[test]
    fn newlines_separate_speakers() {
        let chunks = segment("Maria: Are you there?\nJohn: Right here.");
        assert_eq!(texts(&chunks), vec!["Maria: Are you there?", "John: Right here."]);
        assert!(chunks.iter().all(|chunk| chunk.is_dialogue));
    }

    #[test]
    fn dialogue_predicate() {
        assert!(is_dialogue_line("Maria: hi"));
        assert!(is_dialogue_line("JOHN SMITH: hello"));
        assert!(is_dialogue_line("  Dr. Who: run"));
        assert!(!is_dialogue_line("the time: now"));
        assert!(!is_dialogue_line("Hello there."));
        assert!(!is_dialogue_line("Maria:no space"));
    }

    #[test]
    fn markup_predicate() {
        assert!(has_inline_markup("[laughs] That was great."));
        assert!(has_inline_markup("Say it <slow>slowly</slow>."));
        assert!(has_inline_markup("<break time=\"1s\"/> Next."));
        assert!(!has_inline_markup("Plain text with 3 < 4 and [1]."));

        let chunk = UtteranceChunk::new("[whispers] Quiet now.");
        assert!(chunk.has_embedded_markup);
        assert_eq!(chunk.word_count(), 3);
    }
}

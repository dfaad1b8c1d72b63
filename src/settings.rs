use std::collections::BTreeSet;

use crate::style::StyleName;

pub const DEFAULT_SUPPORTED_LANGUAGES: &str = "en,es,fr,de,it,pt,nl,ja,ko,zh,hi,ar";

/// Runtime configuration read by the pipeline. Published on a watch channel
/// so the dispatch loop always reads a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSettings {
    pub style: StyleName,
    pub language: String,
    pub language_auto_detected: bool,
    pub detected_source_label: Option<String>,
}

impl LiveSettings {
    pub fn new(style: StyleName, language: impl Into<String>) -> Self {
        Self {
            style,
            language: language.into(),
            language_auto_detected: false,
            detected_source_label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedLanguages {
    codes: BTreeSet<String>,
}

impl SupportedLanguages {
    pub fn parse_list(list: &str) -> Self {
        let codes = list
            .split(',')
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty())
            .collect();
        Self { codes }
    }

    /// Maps a language value to its supported code, accepting region
    /// suffixes (`pt-BR` resolves to `pt`) when only the primary subtag is
    /// listed.
    pub fn resolve(&self, value: &str) -> Option<String> {
        let normalized = value.trim().to_lowercase().replace('_', "-");
        if normalized.is_empty() {
            return None;
        }
        if self.codes.contains(&normalized) {
            return Some(normalized);
        }
        let primary = normalized.split('-').next()?;
        self.codes.get(primary).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for SupportedLanguages {
    fn default() -> Self {
        Self::parse_list(DEFAULT_SUPPORTED_LANGUAGES)
    }
}

//! Per-language scraping rules and flashcard layouts.

mod japanese;

use std::fmt;
use std::str::FromStr;

use scraper::Html;

pub use japanese::Japanese;

use crate::deck::NoteModel;
use crate::vocab::VocabularyExtraction;

/// What differs between the language sites of the family.
pub trait Language: Send + Sync {
    /// Display name.
    fn name(&self) -> &'static str;

    /// Value of the `lang` attribute on vocabulary spans.
    fn lang_code(&self) -> &'static str;

    /// Extracts and completes the vocabulary of a lesson page.
    fn scrape(&self, document: &Html) -> VocabularyExtraction {
        crate::vocab::sanity_check(crate::vocab::extract(document, self.lang_code()))
    }

    /// Note model for this language's decks.
    fn note_model(&self) -> NoteModel;
}

/// Languages with a known vocabulary layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupportedLanguage {
    /// japanesepod101.com
    #[default]
    Japanese,
}

impl SupportedLanguage {
    /// The rules for this language.
    #[must_use]
    pub fn language(self) -> &'static dyn Language {
        match self {
            Self::Japanese => &Japanese,
        }
    }
}

impl fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.language().name())
    }
}

/// An unknown language name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language '{0}' (supported: japanese)")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for SupportedLanguage {
    type Err = UnsupportedLanguage;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "japanese" | "ja" => Ok(Self::Japanese),
            _ => Err(UnsupportedLanguage(value.to_string())),
        }
    }
}

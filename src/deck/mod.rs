//! Flashcard decks and `.apkg` packages.
//!
//! A deck holds one note per vocabulary record and the audio files those
//! notes refer to. It is built once per lesson, written next to the lesson's
//! media as `<title without whitespace>.apkg`, and dropped.

mod model;
mod package;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, instrument};

pub use model::{CardTemplate, NoteModel};

use crate::media::deck_file_name;
use crate::vocab::VocabularyExtraction;

/// Errors raised while writing a flashcard package.
#[derive(Debug, Error)]
pub enum DeckError {
    /// Reading media or writing the package failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file concerned.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The embedded collection database could not be written.
    #[error("failed to write flashcard collection: {0}")]
    Collection(#[from] sqlx::Error),

    /// The zip archive could not be written.
    #[error("failed to write package archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A collection JSON column could not be serialized.
    #[error("failed to serialize collection metadata: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking archive writer panicked or was cancelled.
    #[error("package writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DeckError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Deck identifier for `title`: the absolute value of the big-endian `i64`
/// formed by the first eight bytes of its SHA-256.
///
/// Stable across processes, so re-importing a lesson's package updates the
/// same deck.
#[must_use]
pub fn deck_id(title: &str) -> i64 {
    let digest = Sha256::digest(title.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix).checked_abs().unwrap_or(i64::MAX)
}

/// Notes and media of one lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashcardDeck {
    id: i64,
    title: String,
    model: NoteModel,
    notes: Vec<Vec<String>>,
    media_files: BTreeSet<String>,
}

impl FlashcardDeck {
    /// An empty deck named `title`.
    #[must_use]
    pub fn new(title: impl Into<String>, model: NoteModel) -> Self {
        let title = title.into();
        Self {
            id: deck_id(&title),
            title,
            model,
            notes: Vec::new(),
            media_files: BTreeSet::new(),
        }
    }

    /// A deck with one note per record, fields in the order pronunciation,
    /// definition, written form, sound reference.
    ///
    /// Records with every field empty still become notes.
    #[must_use]
    pub fn from_vocabulary(
        title: impl Into<String>,
        model: NoteModel,
        vocabulary: &VocabularyExtraction,
    ) -> Self {
        let mut deck = Self::new(title, model);
        for record in vocabulary.records.values() {
            deck.add_note(vec![
                record.pronunciation.clone(),
                record.english_definition.clone(),
                record.kana.clone(),
                record.audio_reference.clone(),
            ]);
        }
        for file in &vocabulary.audio_files {
            deck.add_media(file.clone());
        }
        deck
    }

    /// Appends a note. Missing trailing fields are stored empty.
    pub fn add_note(&mut self, mut fields: Vec<String>) {
        fields.resize(self.model.fields.len().max(fields.len()), String::new());
        self.notes.push(fields);
    }

    /// Adds a media file name, relative to the folder the package is built from.
    pub fn add_media(&mut self, file_name: impl Into<String>) {
        self.media_files.insert(file_name.into());
    }

    /// Deck identifier.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Deck title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The note model every note uses.
    #[must_use]
    pub fn model(&self) -> &NoteModel {
        &self.model
    }

    /// Note fields in insertion order.
    #[must_use]
    pub fn notes(&self) -> &[Vec<String>] {
        &self.notes
    }

    /// Media file names.
    #[must_use]
    pub fn media_files(&self) -> &BTreeSet<String> {
        &self.media_files
    }

    /// Writes the package to `output`, replacing any existing file.
    ///
    /// Media files are read from `media_dir`; missing ones are left out with
    /// a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DeckError`] when the collection or archive cannot be written.
    pub async fn write_package(&self, media_dir: &Path, output: &Path) -> Result<(), DeckError> {
        package::write_package(self, media_dir, output).await
    }
}

/// Builds the deck for a lesson and writes it into `folder`.
///
/// Returns the path of the written package.
///
/// # Errors
///
/// Returns [`DeckError`] when the package cannot be written.
#[instrument(skip(model, vocabulary), fields(records = vocabulary.records.len()))]
pub async fn build_deck(
    title: &str,
    model: NoteModel,
    vocabulary: &VocabularyExtraction,
    folder: &Path,
) -> Result<PathBuf, DeckError> {
    let deck = FlashcardDeck::from_vocabulary(title, model, vocabulary);
    let output = folder.join(deck_file_name(title));
    deck.write_package(folder, &output).await?;
    info!(
        path = %output.display(),
        notes = deck.notes().len(),
        "wrote flashcard deck"
    );
    Ok(output)
}

//! language101 Core Library
//!
//! Archives whole courses from the Innovative Language family of sites
//! (japanesepod101.com and its siblings): every lesson's audio, video and
//! PDFs, plus an Anki deck built from the lesson vocabulary.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`stack`] - Resumable download stack: course navigation, persistence, the lesson loop
//! - [`session`] - Authenticated site session, page fetches and streaming downloads
//! - [`auth`] - Session cookies and their encrypted storage
//! - [`media`] - Lesson media discovery and file naming
//! - [`vocab`] - Vocabulary table extraction
//! - [`language`] - Per-language scraping rules and note models
//! - [`deck`] - Flashcard decks and `.apkg` packages
//! - [`orchestrator`] - The per-lesson processor tying it together
//! - [`db`] - Database connection and schema management
//! - [`paths`] - Per-user config, stack and session locations

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod db;
pub mod deck;
pub mod language;
pub mod media;
pub mod orchestrator;
pub mod paths;
pub mod session;
pub mod stack;
pub mod vocab;
mod user_agent;

// Re-export commonly used types
pub use auth::{CookieLine, MASTER_KEY_ENV, SessionVault, StorageError};
pub use db::{Database, DbError};
pub use deck::{DeckError, FlashcardDeck, NoteModel, build_deck, deck_id};
pub use language::{Language, SupportedLanguage};
pub use media::{LessonMedia, PlannedFile, locate_media};
pub use orchestrator::{CourseDownloader, LessonReport};
pub use session::{
    CredentialPrompt, Credentials, DownloadError, SessionConfig, SessionError, SiteSession,
};
pub use stack::{
    DelayWindow, DownloadStack, LessonWorkItem, NavigationError, RunError, RunSummary,
    StackError, StackStore, StartPoint, classify_start_url, create_stack, iterate_and_process,
};
pub use vocab::{VocabularyExtraction, VocabularyRecord};

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Archive a whole Innovative Language course: lesson audio, video, PDFs and
/// Anki decks built from each lesson's vocabulary.
///
/// Progress is kept between runs; rerun without `--url` to resume.
#[derive(Parser, Debug)]
#[command(name = "language101")]
#[command(author, version, about)]
pub struct Args {
    /// Level, pathway, or lesson URL to start from (only needed when no download is in progress)
    #[arg(long)]
    pub url: Option<String>,

    /// Site account user name (or LANGUAGE101_USERNAME)
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Site account password (or LANGUAGE101_PASSWORD)
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Directory receiving the pathway folders
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Minimum pause between lessons in seconds
    #[arg(long = "min-delay", allow_negative_numbers = true)]
    pub min_delay: Option<i64>,

    /// Maximum pause between lessons in seconds
    #[arg(long = "max-delay", allow_negative_numbers = true)]
    pub max_delay: Option<i64>,

    /// Build a flashcard deck for every lesson
    #[arg(long, overrides_with = "no_flashcards")]
    pub flashcards: bool,

    /// Do not build flashcard decks
    #[arg(long = "no-flashcards", overrides_with = "flashcards")]
    pub no_flashcards: bool,

    /// Course language (japanese)
    #[arg(long)]
    pub language: Option<String>,

    /// Ignore the saved session and log in again
    #[arg(long = "fresh-login")]
    pub fresh_login: bool,

    /// Resume a download started by another version without asking
    #[arg(long = "accept-stale-stack")]
    pub accept_stale_stack: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// `Some(true)` for `--flashcards`, `Some(false)` for `--no-flashcards`,
    /// `None` when neither was given.
    pub fn flashcards_override(&self) -> Option<bool> {
        if self.flashcards {
            Some(true)
        } else if self.no_flashcards {
            Some(false)
        } else {
            None
        }
    }
}

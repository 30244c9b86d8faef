//! Sequential, resumable processing of a download stack.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{DownloadStack, StackError, StackStore};
use crate::deck::DeckError;
use crate::session::SessionError;

/// Everything a processor needs to know about the lesson at hand.
#[derive(Debug, Clone, Copy)]
pub struct LessonContext<'a> {
    /// 1-based rank of the lesson within its destination folder.
    pub lesson_number: usize,
    /// Absolute lesson page URL.
    pub lesson_url: &'a str,
    /// Existing directory that receives the lesson's files.
    pub folder: &'a Path,
}

/// Why a single lesson could not be finished.
#[derive(Debug, Error)]
pub enum LessonError {
    /// Fetching the lesson page failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The flashcard package could not be written.
    #[error(transparent)]
    Deck(#[from] DeckError),

    /// The lesson folder could not be prepared.
    #[error("IO error in {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl LessonError {
    /// Returns true when continuing with other lessons is pointless.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Session(error) => error.is_fatal(),
            Self::Deck(_) => false,
            Self::Io { .. } => true,
        }
    }
}

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The stack could not be persisted.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// A lesson failed in a way that affects every later lesson.
    #[error("lesson {lesson_url} failed: {source}")]
    Lesson {
        /// The lesson being processed.
        lesson_url: String,
        /// What went wrong.
        #[source]
        source: LessonError,
    },
}

/// Downloads everything belonging to one lesson.
#[async_trait]
pub trait LessonProcessor: Send {
    /// Processes the lesson described by `ctx`.
    async fn process_lesson(&mut self, ctx: &LessonContext<'_>) -> Result<(), LessonError>;
}

/// Randomized pause between lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    min: Duration,
    max: Duration,
}

impl DelayWindow {
    /// Creates a window of `[min_secs, max_secs]` seconds.
    ///
    /// Inverted bounds are swapped with a warning; negative bounds become zero.
    #[must_use]
    pub fn new(min_secs: i64, max_secs: i64) -> Self {
        let (low, high) = if min_secs > max_secs {
            warn!(
                min_delay = min_secs,
                max_delay = max_secs,
                "minimum delay exceeds maximum delay; swapping them"
            );
            (max_secs, min_secs)
        } else {
            (min_secs, max_secs)
        };

        Self {
            min: Duration::from_secs(u64::try_from(low).unwrap_or(0)),
            max: Duration::from_secs(u64::try_from(high).unwrap_or(0)),
        }
    }

    /// A window that never waits.
    #[must_use]
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Lower bound.
    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draws a pause uniformly from the window.
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let low = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let high = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    /// Sleeps for a sampled pause.
    pub async fn wait(&self) {
        let pause = self.sample();
        if pause.is_zero() {
            return;
        }
        debug!(pause_ms = pause.as_millis(), "waiting before next lesson");
        tokio::time::sleep(pause).await;
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Lessons finished during this run.
    pub processed: usize,
    /// Lessons already completed by an earlier run.
    pub skipped: usize,
    /// Lessons that failed and stay pending.
    pub failed: usize,
    /// Whether the whole course is done and the persisted stack was cleared.
    pub stack_cleared: bool,
}

/// Feeds every pending lesson of `stack` to `processor`, in order.
///
/// Each lesson gets `output_root/<destination_folder>` (created on demand).
/// A finished lesson is marked completed and the stack saved before the
/// pause, which is skipped once no pending lesson follows. Non-fatal lesson
/// failures leave the item pending and the run goes on; when every item ends
/// up completed the persisted stack is cleared.
///
/// # Errors
///
/// Returns [`RunError::Lesson`] on the first fatal lesson failure and
/// [`RunError::Stack`] when persistence fails. The stack is then left as of
/// its last successful save.
#[instrument(skip_all, fields(items = stack.len(), pending = stack.pending_count()))]
pub async fn iterate_and_process<P>(
    stack: &mut DownloadStack,
    store: &StackStore,
    processor: &mut P,
    output_root: &Path,
    delay: &DelayWindow,
) -> Result<RunSummary, RunError>
where
    P: LessonProcessor + ?Sized,
{
    let mut summary = RunSummary::default();
    let numbers = stack.lesson_numbers();

    for (index, lesson_number) in numbers.into_iter().enumerate() {
        let Some(item) = stack.items().get(index).cloned() else {
            break;
        };
        if item.completed {
            debug!(lesson = %item.lesson_url, "already downloaded");
            summary.skipped += 1;
            continue;
        }

        let folder = output_root.join(&item.destination_folder);
        if let Err(source) = tokio::fs::create_dir_all(&folder).await {
            return Err(RunError::Lesson {
                lesson_url: item.lesson_url,
                source: LessonError::Io {
                    path: folder,
                    source,
                },
            });
        }

        let ctx = LessonContext {
            lesson_number,
            lesson_url: &item.lesson_url,
            folder: &folder,
        };
        info!(
            lesson = %item.lesson_url,
            number = lesson_number,
            folder = %item.destination_folder,
            "processing lesson"
        );

        let outcome = processor.process_lesson(&ctx).await;
        match outcome {
            Ok(()) => {
                stack.mark_completed(index);
                store.save(stack).await?;
                summary.processed += 1;
            }
            Err(error) if error.is_fatal() => {
                return Err(RunError::Lesson {
                    lesson_url: item.lesson_url,
                    source: error,
                });
            }
            Err(error) => {
                warn!(
                    lesson = %item.lesson_url,
                    error = %error,
                    "lesson failed; it stays pending for the next run"
                );
                summary.failed += 1;
            }
        }

        let more_pending = stack
            .items()
            .iter()
            .skip(index + 1)
            .any(|item| !item.completed);
        if more_pending {
            delay.wait().await;
        }
    }

    if stack.is_complete() {
        store.clear().await?;
        summary.stack_cleared = true;
        info!("every lesson downloaded");
    } else {
        info!(pending = stack.pending_count(), "lessons left for the next run");
    }

    Ok(summary)
}

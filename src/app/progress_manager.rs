//! Progress bar over the lessons of a run.

use std::io::{self, IsTerminal};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use language101_core::stack::{LessonContext, LessonError, LessonProcessor};

/// Wraps a lesson processor and advances a bar after every finished lesson.
pub(crate) struct ProgressReporter<P> {
    inner: P,
    bar: ProgressBar,
}

impl<P> ProgressReporter<P> {
    /// Shows `done` of `total` lessons. The bar is hidden when `enabled` is
    /// false or stderr is not a terminal.
    pub(crate) fn new(inner: P, total: usize, done: usize, enabled: bool) -> Self {
        let total = u64::try_from(total).unwrap_or(u64::MAX);
        let bar = if enabled && io::stderr().is_terminal() {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} lessons {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_length(total);
        bar.set_position(u64::try_from(done).unwrap_or(0));
        Self { inner, bar }
    }

    /// Lessons counted as done so far.
    #[cfg(test)]
    pub(crate) fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Removes the bar.
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[async_trait]
impl<P: LessonProcessor> LessonProcessor for ProgressReporter<P> {
    async fn process_lesson(&mut self, ctx: &LessonContext<'_>) -> Result<(), LessonError> {
        let slug = lesson_slug(ctx.lesson_url).to_string();
        self.bar.set_message(slug);
        let outcome = self.inner.process_lesson(ctx).await;
        if outcome.is_ok() {
            self.bar.inc(1);
        }
        outcome
    }
}

/// Last path segment of a lesson URL.
fn lesson_slug(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

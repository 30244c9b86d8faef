//! Resumable download stack.
//!
//! The stack maps every lesson URL of a course to the folder its files land
//! in and whether it has been downloaded. It is built once from a level or
//! pathway URL, persisted after every completed lesson, and cleared when the
//! whole course is done.
//!
//! # Overview
//!
//! - [`DownloadStack`] / [`LessonWorkItem`] - the in-memory state
//! - [`StackStore`] - `SQLite` persistence
//! - [`create_stack`] - builds a stack by walking level and pathway pages
//! - [`iterate_and_process`] - drives a [`LessonProcessor`] over pending items
//!
//! # Example
//!
//! ```ignore
//! use language101_core::stack::{DelayWindow, StackStore, create_stack, iterate_and_process};
//!
//! let store = StackStore::open(&db_path).await?;
//! let mut stack = match store.load().await? {
//!     Some(stack) => stack,
//!     None => create_stack(&session, start_url).await?,
//! };
//! store.save(&stack).await?;
//! iterate_and_process(&mut stack, &store, &mut processor, &output_root, &DelayWindow::new(5, 15)).await?;
//! ```

mod error;
mod navigation;
mod runner;
mod store;

use std::collections::HashMap;

pub use error::{NavigationError, StackError};
pub use navigation::{COURSE_LEVELS, PageFetcher, StartPoint, classify_start_url, create_stack};
pub use runner::{
    DelayWindow, LessonContext, LessonError, LessonProcessor, RunError, RunSummary,
    iterate_and_process,
};
pub use store::StackStore;

/// Version recorded with every persisted stack.
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One lesson to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonWorkItem {
    /// Absolute lesson page URL; unique within a stack.
    pub lesson_url: String,
    /// Folder (relative to the output root) receiving this lesson's files.
    pub destination_folder: String,
    /// Set once every file of the lesson has been handled.
    pub completed: bool,
}

/// Ordered, de-duplicated set of lesson work items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStack {
    schema_version: String,
    start_url: String,
    items: Vec<LessonWorkItem>,
}

impl DownloadStack {
    /// Creates an empty stack for `start_url` at the running schema version.
    #[must_use]
    pub fn new(start_url: impl Into<String>) -> Self {
        Self::with_version(SCHEMA_VERSION, start_url)
    }

    /// Creates an empty stack recorded under an explicit schema version.
    #[must_use]
    pub fn with_version(schema_version: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
            start_url: start_url.into(),
            items: Vec::new(),
        }
    }

    /// Appends a pending lesson. Returns `false` when the URL is already present.
    pub fn push(
        &mut self,
        lesson_url: impl Into<String>,
        destination_folder: impl Into<String>,
    ) -> bool {
        self.push_item(LessonWorkItem {
            lesson_url: lesson_url.into(),
            destination_folder: destination_folder.into(),
            completed: false,
        })
    }

    /// Appends an item as-is. Returns `false` when the URL is already present.
    pub fn push_item(&mut self, item: LessonWorkItem) -> bool {
        if self
            .items
            .iter()
            .any(|existing| existing.lesson_url == item.lesson_url)
        {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Items in discovery order.
    #[must_use]
    pub fn items(&self) -> &[LessonWorkItem] {
        &self.items
    }

    /// The version this stack was written by.
    #[must_use]
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// The URL the stack was built from.
    #[must_use]
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the stack has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items still to download.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|item| !item.completed).count()
    }

    /// Whether every item has been downloaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.completed)
    }

    /// Marks the item at `index` completed. Returns `false` for an unknown index.
    pub fn mark_completed(&mut self, index: usize) -> bool {
        match self.items.get_mut(index) {
            Some(item) => {
                item.completed = true;
                true
            }
            None => false,
        }
    }

    /// 1-based lesson number of every item, parallel to [`items`](Self::items).
    ///
    /// An item's number is its rank among all items sharing its destination
    /// folder, completed ones included, so numbering survives resumption.
    #[must_use]
    pub fn lesson_numbers(&self) -> Vec<usize> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        self.items
            .iter()
            .map(|item| {
                let count = seen.entry(item.destination_folder.as_str()).or_insert(0);
                *count += 1;
                *count
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stack_uses_running_version() {
        let stack = DownloadStack::new("https://x.com/lesson-library/beginner");
        assert_eq!(stack.schema_version(), SCHEMA_VERSION);
        assert!(stack.is_empty());
        assert!(stack.is_complete());
    }

    #[test]
    fn test_push_rejects_duplicate_urls() {
        let mut stack = DownloadStack::new("s");
        assert!(stack.push("https://x.com/lesson/a", "pathway-1"));
        assert!(!stack.push("https://x.com/lesson/a", "pathway-2"));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.items()[0].destination_folder, "pathway-1");
    }

    #[test]
    fn test_lesson_numbers_are_per_folder() {
        let mut stack = DownloadStack::new("s");
        stack.push("a1", "A");
        stack.push("a2", "A");
        stack.push("b1", "B");
        stack.push("a3", "A");
        stack.push("b2", "B");

        assert_eq!(stack.lesson_numbers(), vec![1, 2, 1, 3, 2]);
    }

    #[test]
    fn test_lesson_numbers_count_completed_items() {
        let mut stack = DownloadStack::new("s");
        stack.push("a1", "A");
        stack.push("a2", "A");
        stack.mark_completed(0);

        assert_eq!(stack.lesson_numbers(), vec![1, 2]);
        assert_eq!(stack.pending_count(), 1);
        assert!(!stack.is_complete());
    }

    #[test]
    fn test_mark_completed_unknown_index() {
        let mut stack = DownloadStack::new("s");
        assert!(!stack.mark_completed(3));
    }
}

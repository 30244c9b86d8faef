//! Error types for the download stack.

use thiserror::Error;

use crate::db::DbError;
use crate::session::SessionError;

/// Errors from persisting or loading the download stack.
#[derive(Debug, Error)]
pub enum StackError {
    /// A database query failed.
    #[error("stack database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The database could not be opened or migrated.
    #[error(transparent)]
    Open(#[from] DbError),

    /// The persisted stack was written by another version of this tool.
    #[error(
        "persisted download stack was written by version {found}, this is version {expected}"
    )]
    StaleVersion {
        /// Version recorded in the database.
        found: String,
        /// Version of the running binary.
        expected: String,
    },

    /// The stack file could not be moved aside after it failed to open.
    #[error("failed to move corrupted stack database aside: {0}")]
    Quarantine(#[source] std::io::Error),
}

/// Errors while turning a start URL into a download stack.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// The bare lesson library, which names no level or pathway.
    #[error("{url} is the lesson library root; pass a level or pathway URL instead")]
    LibraryRoot {
        /// The rejected URL.
        url: String,
    },

    /// Anything that is not a level, pathway, or lesson URL.
    #[error("{url} is not a lesson-library level, pathway, or lesson URL")]
    Unrecognized {
        /// The rejected URL.
        url: String,
    },

    /// The start page listed no lessons at all.
    #[error("no lessons found under {url}")]
    NoLessons {
        /// The start URL.
        url: String,
    },

    /// A level or pathway page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_version_names_both_versions() {
        let error = StackError::StaleVersion {
            found: "0.0.9".to_string(),
            expected: "0.1.0".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("0.0.9") && msg.contains("0.1.0"), "got: {msg}");
    }

    #[test]
    fn test_library_root_message_suggests_level() {
        let error = NavigationError::LibraryRoot {
            url: "https://www.japanesepod101.com/lesson-library".to_string(),
        };
        assert!(error.to_string().contains("level or pathway"));
    }
}

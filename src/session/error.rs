//! Error types for the site session.

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::StorageError;

/// Errors raised while authenticating or fetching pages.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Login was rejected or the session could not be re-established.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// What went wrong, suitable for the operator.
        reason: String,
    },

    /// The site answered 401/403 or bounced to the login form.
    #[error("session expired fetching {url} (HTTP {status})")]
    SessionExpired {
        /// The URL that was refused.
        url: String,
        /// HTTP status code, or 0 for a login redirect.
        status: u16,
    },

    /// Non-success response for a page.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that failed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Network-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The URL could not be parsed or joined against the site root.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// Building the HTTP client failed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Reading or writing the persisted session failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Creates an authentication error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Returns true when retrying other lessons cannot help.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired { .. } | Self::Storage(_)
        )
    }
}

/// Errors for a single media download. Never fatal to the run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error during download (create file, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

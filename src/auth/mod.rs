//! Site session cookies and their encrypted persistence.
//!
//! Cookies captured from the login response are kept in a `reqwest` jar for
//! the current run and written to an encrypted file so the next run can skip
//! the login form.

mod cookies;
mod storage;

pub use cookies::{CookieLine, restore_cookies_into};
pub use storage::{MASTER_KEY_ENV, SessionVault, StorageError};

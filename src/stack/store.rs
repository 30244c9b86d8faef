//! `SQLite` persistence for the download stack.

use std::path::{Path, PathBuf};

use sqlx::Row;
use sqlx::migrate::MigrateError;
use tracing::{debug, info, instrument, warn};

use super::{DownloadStack, LessonWorkItem, SCHEMA_VERSION, StackError};
use crate::db::{Database, DbError};

/// Result type for stack store operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Persists one [`DownloadStack`] per database.
#[derive(Debug, Clone)]
pub struct StackStore {
    db: Database,
}

impl StackStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens the stack database at `path`.
    ///
    /// A file `SQLite` reports as corrupt or not a database is renamed to
    /// `<path>.corrupt` and a fresh database is created in its place. Every
    /// other failure leaves the file alone.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::StaleVersion`] when the database carries
    /// migrations from a newer release (see
    /// [`open_accepting_newer_schema`](Self::open_accepting_newer_schema)),
    /// and [`StackError::Open`] when it cannot be opened for any other reason.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false).await
    }

    /// Opens a database written by a newer release, once the operator has
    /// agreed to continue its stack.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn open_accepting_newer_schema(path: &Path) -> Result<Self> {
        Self::open_with(path, true).await
    }

    #[instrument(skip(path), fields(path = %path.display()))]
    async fn open_with(path: &Path, accept_newer_schema: bool) -> Result<Self> {
        let opened = if accept_newer_schema {
            Database::new_ignoring_unknown_migrations(path).await
        } else {
            Database::new(path).await
        };

        match opened {
            Ok(db) => Ok(Self::new(db)),
            Err(DbError::Migration(MigrateError::VersionMissing(migration))) => {
                Err(StackError::StaleVersion {
                    found: format!("newer than {SCHEMA_VERSION} (schema migration {migration})"),
                    expected: SCHEMA_VERSION.to_string(),
                })
            }
            Err(error) if path.exists() && is_corruption(&error) => {
                let aside = quarantine_path(path);
                warn!(
                    error = %error,
                    moved_to = %aside.display(),
                    "stack database is corrupt; starting a new stack"
                );
                std::fs::rename(path, &aside).map_err(StackError::Quarantine)?;
                for suffix in ["-wal", "-shm"] {
                    remove_stale_sidecar(&sibling_with_suffix(path, suffix));
                }
                Ok(Self::new(Database::new(path).await?))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Loads the persisted stack.
    ///
    /// Returns `Ok(None)` when nothing is persisted, or when the persisted rows
    /// are inconsistent (logged, then discarded).
    ///
    /// # Errors
    ///
    /// Returns [`StackError::StaleVersion`] when the stack was written by a
    /// different version, or [`StackError::Database`] when queries fail.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<DownloadStack>> {
        let meta = sqlx::query("SELECT schema_version, start_url FROM stack_meta WHERE id = 1")
            .fetch_optional(self.db.pool())
            .await?;

        let rows = sqlx::query(
            "SELECT lesson_url, destination_folder, completed FROM stack_items ORDER BY position",
        )
        .fetch_all(self.db.pool())
        .await?;

        let Some(meta) = meta else {
            if !rows.is_empty() {
                warn!(
                    items = rows.len(),
                    "stack items without stack metadata; discarding persisted stack"
                );
                self.clear().await?;
            }
            return Ok(None);
        };

        let found: String = meta.try_get("schema_version")?;
        if found != SCHEMA_VERSION {
            return Err(StackError::StaleVersion {
                found,
                expected: SCHEMA_VERSION.to_string(),
            });
        }

        let start_url: String = meta.try_get("start_url")?;
        let mut stack = DownloadStack::with_version(found, start_url);
        for row in rows {
            let completed: i64 = row.try_get("completed")?;
            let inserted = stack.push_item(LessonWorkItem {
                lesson_url: row.try_get("lesson_url")?,
                destination_folder: row.try_get("destination_folder")?,
                completed: completed != 0,
            });
            if !inserted {
                debug!("skipping duplicate persisted lesson");
            }
        }

        info!(
            items = stack.len(),
            pending = stack.pending_count(),
            "loaded persisted download stack"
        );
        Ok(Some(stack))
    }

    /// Replaces the persisted state with `stack` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Database`] when the transaction fails; the
    /// previously persisted state is then left untouched.
    #[instrument(skip(self, stack), fields(items = stack.len()))]
    pub async fn save(&self, stack: &DownloadStack) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM stack_items")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stack_meta").execute(&mut *tx).await?;

        sqlx::query("INSERT INTO stack_meta (id, schema_version, start_url) VALUES (1, ?, ?)")
            .bind(stack.schema_version())
            .bind(stack.start_url())
            .execute(&mut *tx)
            .await?;

        for (position, item) in stack.items().iter().enumerate() {
            let position = i64::try_from(position).unwrap_or(i64::MAX);
            sqlx::query(
                "INSERT INTO stack_items (position, lesson_url, destination_folder, completed) VALUES (?, ?, ?, ?)",
            )
            .bind(position)
            .bind(&item.lesson_url)
            .bind(&item.destination_folder)
            .bind(i64::from(item.completed))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(pending = stack.pending_count(), "saved download stack");
        Ok(())
    }

    /// Removes the persisted stack.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Database`] when the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM stack_items")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stack_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        info!("cleared download stack");
        Ok(())
    }

    /// Re-stamps a persisted stack from another version with the running version.
    ///
    /// Call only after the operator confirmed the old stack is still usable.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Database`] when the update fails.
    #[instrument(skip(self))]
    pub async fn accept_current_version(&self) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE stack_meta SET schema_version = ?, updated_at = datetime('now') WHERE id = 1",
        )
        .bind(SCHEMA_VERSION)
        .execute(self.db.pool())
        .await?
        .rows_affected();
        info!(updated, version = SCHEMA_VERSION, "accepted persisted stack");
        Ok(())
    }

    /// Closes the underlying database.
    pub async fn close(self) {
        self.db.close().await;
    }
}

/// `SQLITE_CORRUPT` and `SQLITE_NOTADB` primary result codes.
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Whether `error` means the file itself is damaged, as opposed to being
/// locked, unreadable, or from another release.
fn is_corruption(error: &DbError) -> bool {
    let source = match error {
        DbError::Connection(source)
        | DbError::Migration(
            MigrateError::Execute(source) | MigrateError::ExecuteMigration(source, _),
        ) => source,
        _ => return false,
    };
    let sqlx::Error::Database(database_error) = source else {
        return false;
    };
    database_error
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB))
}

/// Removes a WAL or shared-memory file left next to a quarantined database.
/// Returns whether the file is gone.
fn remove_stale_sidecar(sidecar: &Path) -> bool {
    match std::fs::remove_file(sidecar) {
        Ok(()) => true,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => true,
        Err(error) => {
            warn!(
                path = %sidecar.display(),
                error = %error,
                "could not remove stale database file"
            );
            false
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".corrupt")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store() -> StackStore {
        StackStore::new(Database::new_in_memory().await.unwrap())
    }

    fn sample_stack() -> DownloadStack {
        let mut stack = DownloadStack::new("https://x.com/lesson-library/pathway-a");
        stack.push("https://x.com/lesson/one", "pathway-a");
        stack.push("https://x.com/lesson/two", "pathway-a");
        stack.mark_completed(0);
        stack
    }

    #[tokio::test]
    async fn test_load_empty_store_returns_none() {
        assert!(store().await.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order_and_status() {
        let store = store().await;
        let stack = sample_stack();
        store.save(&stack).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, stack);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let store = store().await;
        store.save(&sample_stack()).await.unwrap();

        let mut smaller = DownloadStack::new("https://x.com/lesson-library/pathway-b");
        smaller.push("https://x.com/lesson/three", "pathway-b");
        store.save(&smaller).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap(), smaller);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = store().await;
        store.save(&sample_stack()).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_version_is_reported_then_accepted() {
        let store = store().await;
        let mut old = DownloadStack::with_version("0.0.1-old", "https://x.com/lesson-library/p");
        old.push("https://x.com/lesson/one", "p");
        store.save(&old).await.unwrap();

        let error = store.load().await.unwrap_err();
        assert!(matches!(
            error,
            StackError::StaleVersion { ref found, .. } if found == "0.0.1-old"
        ));

        store.accept_current_version().await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.schema_version(), SCHEMA_VERSION);
        assert_eq!(loaded.items(), old.items());
    }

    #[tokio::test]
    async fn test_items_without_meta_are_discarded() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO stack_items (position, lesson_url, destination_folder) VALUES (0, 'u', 'f')",
        )
        .execute(store.db.pool())
        .await
        .unwrap();

        assert!(store.load().await.unwrap().is_none());
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stack_items")
            .fetch_one(store.db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_open_moves_corrupted_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let store = StackStore::open(&path).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(dir.path().join("stack.db.corrupt").exists());
    }

    #[tokio::test]
    async fn test_open_failure_that_is_not_corruption_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be cannot be opened,
        // but nothing about it is corrupt.
        let path = dir.path().join("stack.db");
        std::fs::create_dir(&path).unwrap();

        let error = StackStore::open(&path).await.unwrap_err();

        assert!(matches!(error, StackError::Open(_)), "got {error:?}");
        assert!(path.is_dir());
        assert!(!dir.path().join("stack.db.corrupt").exists());
    }

    #[test]
    fn test_remove_stale_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("stack.db-wal");
        assert!(remove_stale_sidecar(&missing));

        let present = dir.path().join("stack.db-shm");
        std::fs::write(&present, b"shm").unwrap();
        assert!(remove_stale_sidecar(&present));
        assert!(!present.exists());

        let undeletable = dir.path().join("dir-wal");
        std::fs::create_dir(&undeletable).unwrap();
        assert!(!remove_stale_sidecar(&undeletable));
        assert!(undeletable.exists());
    }

    #[test]
    fn test_quarantine_path_appends_suffix() {
        assert_eq!(
            quarantine_path(Path::new("/cfg/stack.db")),
            PathBuf::from("/cfg/stack.db.corrupt")
        );
    }
}

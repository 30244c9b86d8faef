//! One run: open the stack, authenticate, build or resume, process.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use language101_core::paths;
use language101_core::session::site_root_of;
use language101_core::stack::{StackError, classify_start_url};
use language101_core::{
    CourseDownloader, DownloadStack, RunSummary, SessionConfig, SessionVault, SiteSession,
    StackStore, create_stack, iterate_and_process,
};
use tracing::{debug, info, warn};

use crate::app::progress_manager::ProgressReporter;
use crate::app::settings::{self, Settings};

pub(crate) async fn run(settings: Settings) -> Result<RunSummary> {
    if let Some(url) = settings.start_url.as_deref() {
        let start = classify_start_url(url)?;
        debug!(?start, "start URL classified");
    }

    let db_path = paths::stack_db_path().context("Cannot locate the download stack")?;
    let store = open_store(&db_path, settings.accept_stale_stack)
        .await
        .with_context(|| format!("Failed to open download stack '{}'", db_path.display()))?;

    let resumed = match load_stack(&store, settings.accept_stale_stack).await? {
        Some(stack) if stack.is_complete() => {
            store.clear().await?;
            info!(
                lessons = stack.len(),
                "previous download was already complete; stack cleared"
            );
            if settings.start_url.is_none() {
                store.close().await;
                return Ok(RunSummary {
                    skipped: stack.len(),
                    stack_cleared: true,
                    ..RunSummary::default()
                });
            }
            None
        }
        other => other,
    };
    let start_url = match (&resumed, settings.start_url.as_deref()) {
        (Some(stack), Some(url)) if stack.start_url() != url => {
            warn!(
                in_progress = %stack.start_url(),
                requested = %url,
                "a download is already in progress; resuming it and ignoring --url"
            );
            stack.start_url().to_string()
        }
        (Some(stack), _) => stack.start_url().to_string(),
        (None, Some(url)) => url.to_string(),
        (None, None) => {
            bail!("No download in progress. Pass --url with a level, pathway, or lesson URL.")
        }
    };

    let session = Arc::new(open_session(&settings, &start_url).await?);

    let mut stack = match resumed {
        Some(stack) => {
            info!(
                lessons = stack.len(),
                pending = stack.pending_count(),
                "resuming download"
            );
            stack
        }
        None => {
            let stack = create_stack(session.as_ref(), &start_url).await?;
            store.save(&stack).await?;
            info!(lessons = stack.len(), "download stack created");
            stack
        }
    };

    let downloader =
        CourseDownloader::new(Arc::clone(&session), settings.language, settings.flashcards);
    let done = stack.len() - stack.pending_count();
    let mut processor = ProgressReporter::new(downloader, stack.len(), done, !settings.quiet);

    let outcome = iterate_and_process(
        &mut stack,
        &store,
        &mut processor,
        &settings.output_dir,
        &settings.delay,
    )
    .await;
    processor.finish();
    store.close().await;

    let summary = outcome?;
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        finished = summary.stack_cleared,
        "run complete"
    );
    Ok(summary)
}

/// Opens the stack database, asking before using one a newer release migrated.
async fn open_store(path: &Path, accept_stale: bool) -> Result<StackStore> {
    match StackStore::open(path).await {
        Ok(store) => Ok(store),
        Err(StackError::StaleVersion { found, expected }) => {
            confirm_stale(&found, &expected, accept_stale)?;
            Ok(StackStore::open_accepting_newer_schema(path).await?)
        }
        Err(error) => Err(error.into()),
    }
}

/// Loads the persisted stack, asking before adopting one written by another version.
async fn load_stack(store: &StackStore, accept_stale: bool) -> Result<Option<DownloadStack>> {
    match store.load().await {
        Ok(stack) => Ok(stack),
        Err(StackError::StaleVersion { found, expected }) => {
            confirm_stale(&found, &expected, accept_stale)?;
            store.accept_current_version().await?;
            Ok(store.load().await?)
        }
        Err(error) => Err(error.into()),
    }
}

fn confirm_stale(found: &str, expected: &str, accept_stale: bool) -> Result<()> {
    let accepted = accept_stale
        || settings::confirm(&format!(
            "The download in progress was started by version {found}; continue it with version {expected}?"
        ))?;
    if !accepted {
        bail!(
            "Download stack was written by version {found} (this is {expected}). \
             Rerun with --accept-stale-stack to continue it."
        );
    }
    Ok(())
}

async fn open_session(settings: &Settings, start_url: &str) -> Result<SiteSession> {
    let site_root = site_root_of(start_url)?;
    let vault = SessionVault::new(paths::session_file_path().context("Cannot locate the session file")?);

    let mut config = SessionConfig::new(site_root);
    config.auth_marker_header.clone_from(&settings.auth_marker_header);
    let session = SiteSession::new(config, settings.credentials(), Some(vault))?
        .with_credential_prompt(settings.credential_prompt());

    if settings.fresh_login {
        session.login().await?;
    } else {
        session.restore_or_login().await?;
    }
    Ok(session)
}

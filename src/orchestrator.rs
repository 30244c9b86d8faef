//! Per-lesson work: media files, vocabulary audio and the flashcard deck.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use crate::deck::build_deck;
use crate::language::SupportedLanguage;
use crate::media::{last_segment, locate_media};
use crate::session::SiteSession;
use crate::stack::{LessonContext, LessonError, LessonProcessor};
use crate::vocab::VocabularyExtraction;

/// Files handled for one lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LessonReport {
    /// Media files saved.
    pub saved: usize,
    /// Media files that could not be downloaded.
    pub failed: usize,
    /// Vocabulary entries turned into notes.
    pub notes: usize,
}

/// Downloads a lesson's media and, when enabled, builds its flashcard deck.
#[derive(Debug)]
pub struct CourseDownloader {
    session: Arc<SiteSession>,
    language: SupportedLanguage,
    flashcards: bool,
    last_report: LessonReport,
}

/// One file to fetch into the lesson folder.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileJob {
    url: String,
    path: PathBuf,
}

/// Everything read from a lesson page, owning no part of the document.
#[derive(Debug, Default)]
struct LessonPlan {
    title: String,
    media: Vec<FileJob>,
    vocabulary: Option<VocabularyExtraction>,
    vocabulary_audio: Vec<FileJob>,
    unusable_audio: usize,
}

impl CourseDownloader {
    /// Creates a processor fetching through `session`.
    #[must_use]
    pub fn new(session: Arc<SiteSession>, language: SupportedLanguage, flashcards: bool) -> Self {
        Self {
            session,
            language,
            flashcards,
            last_report: LessonReport::default(),
        }
    }

    /// What the most recent lesson produced.
    #[must_use]
    pub fn last_report(&self) -> LessonReport {
        self.last_report
    }

    /// Downloads every job, logging and counting failures.
    async fn fetch_all(&self, jobs: Vec<FileJob>, report: &mut LessonReport) {
        for job in jobs {
            match self.session.download_to_file(&job.url, &job.path).await {
                Ok(bytes) => {
                    debug!(path = %job.path.display(), bytes, "saved lesson file");
                    report.saved += 1;
                }
                Err(error) => {
                    warn!(path = %job.path.display(), error = %error, "skipping lesson file");
                    report.failed += 1;
                }
            }
        }
    }
}

#[async_trait]
impl LessonProcessor for CourseDownloader {
    async fn process_lesson(&mut self, ctx: &LessonContext<'_>) -> Result<(), LessonError> {
        let lesson_url = ctx.lesson_url.to_string();
        let lesson_number = ctx.lesson_number;
        let folder = ctx.folder.to_path_buf();

        let body = self.session.get_page(&lesson_url).await?;
        let plan = plan_lesson(
            &body,
            self.session.site_root(),
            lesson_number,
            &folder,
            self.flashcards.then_some(self.language),
        );

        let mut report = LessonReport {
            failed: plan.unusable_audio,
            ..LessonReport::default()
        };
        self.fetch_all(plan.media, &mut report).await;

        if let Some(vocabulary) = plan.vocabulary {
            self.fetch_all(plan.vocabulary_audio, &mut report).await;
            let model = self.language.language().note_model();
            build_deck(&plan.title, model, &vocabulary, &folder).await?;
            report.notes = vocabulary.records.len();
        }

        info!(
            lesson = %lesson_url,
            number = lesson_number,
            title = %plan.title,
            saved = report.saved,
            failed = report.failed,
            notes = report.notes,
            "lesson done"
        );
        self.last_report = report;
        Ok(())
    }
}

/// Plans the downloads of a lesson page and, for `Some(language)`, scrapes
/// its vocabulary. The parsed document never outlives this call.
fn plan_lesson(
    body: &str,
    site_root: &Url,
    lesson_number: usize,
    folder: &Path,
    language: Option<SupportedLanguage>,
) -> LessonPlan {
    let media = locate_media(body, site_root, lesson_number);
    let mut plan = LessonPlan {
        media: media
            .files
            .into_iter()
            .map(|file| FileJob {
                path: folder.join(&file.file_name),
                url: file.url,
            })
            .collect(),
        title: media.title,
        ..LessonPlan::default()
    };

    let Some(language) = language else {
        return plan;
    };
    let vocabulary = {
        let document = Html::parse_document(body);
        language.language().scrape(&document)
    };

    let mut seen = HashSet::new();
    for href in &vocabulary.media_urls {
        let Some((url, file_name)) = resolve_audio(site_root, href) else {
            warn!(url = %href, "skipping unusable vocabulary audio URL");
            plan.unusable_audio += 1;
            continue;
        };
        if seen.insert(file_name.clone()) {
            plan.vocabulary_audio.push(FileJob {
                url: url.to_string(),
                path: folder.join(file_name),
            });
        }
    }
    plan.vocabulary = Some(vocabulary);
    plan
}

/// Absolute URL and local file name of a vocabulary audio link.
fn resolve_audio(site_root: &Url, href: &str) -> Option<(Url, String)> {
    let url = site_root.join(href.trim()).ok()?;
    let file_name = last_segment(&url)?;
    Some((url, file_name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_audio_relative_and_absolute() {
        let root: Url = "https://www.japanesepod101.com/".parse().unwrap();

        let (url, name) = resolve_audio(&root, "/audio/neko.mp3").unwrap();
        assert_eq!(url.as_str(), "https://www.japanesepod101.com/audio/neko.mp3");
        assert_eq!(name, "neko.mp3");

        let (_, name) = resolve_audio(&root, "https://cdn/x/review_audio_03.mp3").unwrap();
        assert_eq!(name, "review_audio_03.mp3");

        assert!(resolve_audio(&root, "https://cdn/").is_none());
    }

    #[test]
    fn test_plan_without_flashcards_skips_vocabulary() {
        let root: Url = "https://www.japanesepod101.com/".parse().unwrap();
        let folder = Path::new("/out/pathway");
        let plan = plan_lesson("<title>T</title>", &root, 1, folder, None);
        assert_eq!(plan.title, "T");
        assert!(plan.vocabulary.is_none());
        assert!(plan.vocabulary_audio.is_empty());

        let plan = plan_lesson(
            "<title>T</title>",
            &root,
            1,
            folder,
            Some(SupportedLanguage::Japanese),
        );
        assert!(plan.vocabulary.unwrap().records.is_empty());
    }

    #[test]
    fn test_plan_owns_jobs_inside_lesson_folder() {
        let root: Url = "https://www.japanesepod101.com/".parse().unwrap();
        let folder = Path::new("/out/pathway");
        let body = r#"<title>Cats</title>
            <audio data-trackurl="https://cdn/x/cats_dialog.mp3"></audio>
            <table>
              <tr><td><span lang="ja">猫</span></td>
                  <td><button class="js-lsn3-play-vocabulary" data-type="audio/mp3" data-src="/v/neko.mp3"></button></td></tr>
              <tr><td><span lang="ja">猫</span></td>
                  <td><button class="js-lsn3-play-vocabulary" data-type="audio/mp3" data-src="/v/neko.mp3"></button></td></tr>
            </table>"#;

        let plan = plan_lesson(body, &root, 3, folder, Some(SupportedLanguage::Japanese));

        assert_eq!(
            plan.media,
            vec![FileJob {
                url: "https://cdn/x/cats_dialog.mp3".to_string(),
                path: folder.join("03 - Cats - Dialogue.mp3"),
            }]
        );
        assert_eq!(
            plan.vocabulary_audio,
            vec![FileJob {
                url: "https://www.japanesepod101.com/v/neko.mp3".to_string(),
                path: folder.join("neko.mp3"),
            }],
            "the same audio is fetched once"
        );
        assert_eq!(plan.unusable_audio, 0);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_lesson_future_is_send() {
        let session = Arc::new(
            SiteSession::new(
                crate::session::SessionConfig::new("http://127.0.0.1:9/".parse().unwrap()),
                None,
                None,
            )
            .unwrap(),
        );
        let mut downloader = CourseDownloader::new(session, SupportedLanguage::Japanese, true);
        let ctx = LessonContext {
            lesson_number: 1,
            lesson_url: "http://127.0.0.1:9/lesson/a",
            folder: Path::new("."),
        };
        let future = downloader.process_lesson(&ctx);
        assert_send(&future);
    }
}

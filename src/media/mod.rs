//! Lesson media discovery and naming.
//!
//! A lesson page carries its audio tracks on `<audio>` elements, its video on
//! high-quality `<source>` elements, and its PDFs under `#pdfs`. Every file is
//! planned with a deterministic name prefixed by the zero-padded lesson number.

mod filename;

use std::fmt;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

pub use filename::{
    NameRegistry, deck_file_name, extension, last_segment, sanitize_filename, sanitize_title,
};

/// Which section of a lesson an audio track belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCategory {
    /// The lesson dialogue.
    Dialogue,
    /// The review track.
    Review,
    /// Anything else.
    MainLesson,
}

impl AudioCategory {
    /// Derives the category from the final segment of a track URL.
    #[must_use]
    pub fn from_track_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("dialog") {
            Self::Dialogue
        } else if lower.contains("review") {
            Self::Review
        } else {
            Self::MainLesson
        }
    }

    /// Label used in file names.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Dialogue => "Dialogue",
            Self::Review => "Review",
            Self::MainLesson => "Main Lesson",
        }
    }
}

impl fmt::Display for AudioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of a planned lesson file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// An `.mp3` track.
    Audio(AudioCategory),
    /// An `.mp4`/`.m4v` video.
    Video,
    /// A PDF handout.
    Pdf,
}

/// One file to download for a lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Absolute source URL.
    pub url: String,
    /// File name inside the lesson folder.
    pub file_name: String,
    /// What the file is.
    pub kind: MediaKind,
}

/// Title and files found on a lesson page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonMedia {
    /// Sanitized page title.
    pub title: String,
    /// Files in page order: audio, then video, then PDFs.
    pub files: Vec<PlannedFile>,
}

/// Finds every downloadable file on a lesson page.
///
/// Relative URLs are resolved against `site_root`. Names never depend on the
/// state of the output folder.
#[must_use]
#[instrument(level = "debug", skip(body, site_root))]
pub fn locate_media(body: &str, site_root: &Url, lesson_number: usize) -> LessonMedia {
    let document = Html::parse_document(body);
    let title = lesson_title(&document);
    let prefix = format!("{lesson_number:02}");
    let mut names = NameRegistry::new();
    let mut files = Vec::new();

    for url in audio_urls(&document, site_root) {
        let Some(track) = last_segment(&url) else {
            continue;
        };
        let category = AudioCategory::from_track_name(&track);
        let ext = extension(&track).unwrap_or("mp3");
        let file_name = names.claim(&format!("{prefix} - {title} - {category}.{ext}"));
        files.push(PlannedFile {
            url: url.into(),
            file_name,
            kind: MediaKind::Audio(category),
        });
    }

    for url in video_urls(&document, site_root) {
        let ext = last_segment(&url)
            .as_deref()
            .and_then(extension)
            .unwrap_or("mp4")
            .to_string();
        let file_name = names.claim(&format!("{prefix} - {title}.{ext}"));
        files.push(PlannedFile {
            url: url.into(),
            file_name,
            kind: MediaKind::Video,
        });
    }

    for url in pdf_urls(&document, site_root) {
        let Some(name) = last_segment(&url) else {
            continue;
        };
        let file_name = names.claim(&name);
        files.push(PlannedFile {
            url: url.into(),
            file_name,
            kind: MediaKind::Pdf,
        });
    }

    debug!(title = %title, files = files.len(), "located lesson media");
    LessonMedia { title, files }
}

/// Sanitized `<title>` text of a lesson page.
#[must_use]
pub fn lesson_title(document: &Html) -> String {
    let Ok(selector) = Selector::parse("title") else {
        return sanitize_title("");
    };
    let raw = document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .unwrap_or_default();
    sanitize_title(&raw)
}

fn path_ends_with_any(url: &Url, suffixes: &[&str]) -> bool {
    let path = url.path().to_lowercase();
    suffixes.iter().any(|suffix| path.ends_with(suffix))
}

fn audio_urls(document: &Html, site_root: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("audio") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|element| {
            let attrs = element.value();
            attrs.attr("data-trackurl").or_else(|| attrs.attr("data-url"))
        })
        .filter_map(|href| site_root.join(href.trim()).ok())
        .filter(|url| path_ends_with_any(url, &[".mp3"]))
        .collect()
}

fn video_urls(document: &Html, site_root: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse(r#"source[type="video/mp4"][data-quality="h"][src]"#)
    else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("src"))
        .filter_map(|href| site_root.join(href.trim()).ok())
        .filter(|url| path_ends_with_any(url, &[".mp4", ".m4v"]))
        .collect()
}

fn pdf_urls(document: &Html, site_root: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("#pdfs a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| site_root.join(href.trim()).ok())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn root() -> Url {
        "https://www.japanesepod101.com/".parse().unwrap()
    }

    const LESSON_PAGE: &str = r#"
        <html><head><title>Lower Beginner #1: Who Are You?</title></head>
        <body>
          <audio data-trackurl="https://cdn.innovativelanguage.com/x/lb1_dialog_011514.mp3"></audio>
          <audio data-url="https://cdn.innovativelanguage.com/x/lb1_review_011514.mp3"></audio>
          <audio data-trackurl="https://cdn.innovativelanguage.com/x/lb1_011514.mp3"></audio>
          <audio data-trackurl="https://cdn.innovativelanguage.com/x/lb1_011514.m4a"></audio>
          <audio></audio>
          <video>
            <source type="video/mp4" data-quality="h" src="https://cdn.innovativelanguage.com/v/lb1_hq.mp4">
            <source type="video/mp4" data-quality="m" src="https://cdn.innovativelanguage.com/v/lb1_mq.mp4">
          </video>
          <div id="pdfs">
            <a href="/pdfs/lb1_lesson_notes.pdf">Notes</a>
            <a href="https://cdn.innovativelanguage.com/pdf/lb1_checklist.pdf">Checklist</a>
          </div>
          <a href="/pdfs/outside.pdf">not in #pdfs</a>
        </body></html>
    "#;

    #[test]
    fn test_audio_category_from_track_name() {
        assert_eq!(
            AudioCategory::from_track_name("review_audio_03.mp3"),
            AudioCategory::Review
        );
        assert_eq!(
            AudioCategory::from_track_name("LB1_Dialogue.mp3"),
            AudioCategory::Dialogue
        );
        assert_eq!(
            AudioCategory::from_track_name("lesson.mp3"),
            AudioCategory::MainLesson
        );
    }

    #[test]
    fn test_locate_media_names_and_order() {
        let media = locate_media(LESSON_PAGE, &root(), 3);
        assert_eq!(media.title, "Lower Beginner 1 Who Are You");

        let names: Vec<&str> = media.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "03 - Lower Beginner 1 Who Are You - Dialogue.mp3",
                "03 - Lower Beginner 1 Who Are You - Review.mp3",
                "03 - Lower Beginner 1 Who Are You - Main Lesson.mp3",
                "03 - Lower Beginner 1 Who Are You.mp4",
                "lb1_lesson_notes.pdf",
                "lb1_checklist.pdf",
            ]
        );
    }

    #[test]
    fn test_locate_media_resolves_pdf_against_site_root() {
        let media = locate_media(LESSON_PAGE, &root(), 1);
        let pdf = media
            .files
            .iter()
            .find(|f| f.kind == MediaKind::Pdf)
            .unwrap();
        assert_eq!(
            pdf.url,
            "https://www.japanesepod101.com/pdfs/lb1_lesson_notes.pdf"
        );
    }

    #[test]
    fn test_locate_media_numbers_colliding_names() {
        let body = r#"
            <title>Same</title>
            <audio data-trackurl="https://cdn/x/a_review.mp3"></audio>
            <audio data-trackurl="https://cdn/x/b_review.mp3"></audio>
        "#;
        let media = locate_media(body, &root(), 12);
        let names: Vec<&str> = media.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["12 - Same - Review.mp3", "12 - Same - Review (2).mp3"]
        );
    }

    #[test]
    fn test_locate_media_empty_page() {
        let media = locate_media("<html></html>", &root(), 1);
        assert!(media.files.is_empty());
        assert_eq!(media.title, "_");
    }
}

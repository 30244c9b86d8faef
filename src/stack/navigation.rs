//! Start URL classification and course enumeration.
//!
//! A start URL names either a whole level (`/lesson-library/<level>`), one
//! pathway (`/lesson-library/<pathway>`), or a lesson inside a course
//! (`/lesson/<slug>?lp=<n>`), whose page lists its siblings in a `<select>`.

use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{DownloadStack, NavigationError};
use crate::session::SessionError;

/// Level slugs of the lesson library. Every other slug is a pathway.
pub const COURSE_LEVELS: [&str; 7] = [
    "introduction",
    "absolute-beginner",
    "beginner",
    "intermediate",
    "upper-intermediate",
    "advanced",
    "bonus",
];

const LIBRARY_SEGMENT: &str = "lesson-library";
const LESSON_SEGMENT: &str = "lesson";

/// Source of page bodies for course enumeration.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the body of `url`.
    async fn fetch_page(&self, url: &str) -> Result<String, SessionError>;
}

/// What a start URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPoint {
    /// A course level listing several pathways.
    Level {
        /// The level page.
        url: Url,
        /// Level slug, e.g. `beginner`.
        level: String,
    },
    /// One pathway listing its lessons.
    Pathway {
        /// The pathway page.
        url: Url,
        /// Destination folder, the pathway slug.
        folder: String,
    },
    /// A lesson whose page lists every lesson of its course.
    Lesson {
        /// The lesson page.
        url: Url,
        /// Destination folder, `lp-<n>` or the lesson slug.
        folder: String,
    },
}

/// Classifies `start_url` without touching the network.
///
/// # Errors
///
/// Returns [`NavigationError::LibraryRoot`] for the bare lesson library and
/// [`NavigationError::Unrecognized`] for anything that is not a level,
/// pathway, or lesson URL.
pub fn classify_start_url(start_url: &str) -> Result<StartPoint, NavigationError> {
    let unrecognized = || NavigationError::Unrecognized {
        url: start_url.to_string(),
    };
    let url = Url::parse(start_url.trim()).map_err(|_| unrecognized())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(unrecognized());
    }

    let segments = path_segments(&url);
    match segments.as_slice() {
        [LIBRARY_SEGMENT] => Err(NavigationError::LibraryRoot {
            url: start_url.to_string(),
        }),
        [LIBRARY_SEGMENT, level] if COURSE_LEVELS.contains(level) => Ok(StartPoint::Level {
            level: (*level).to_string(),
            url: url.clone(),
        }),
        [LIBRARY_SEGMENT, pathway] => Ok(StartPoint::Pathway {
            folder: (*pathway).to_string(),
            url: url.clone(),
        }),
        [LESSON_SEGMENT, slug] => {
            let folder = url
                .query_pairs()
                .find(|(key, value)| key == "lp" && !value.is_empty())
                .map_or_else(|| (*slug).to_string(), |(_, value)| format!("lp-{value}"));
            Ok(StartPoint::Lesson {
                folder,
                url: url.clone(),
            })
        }
        _ => Err(unrecognized()),
    }
}

/// Builds a fresh stack by walking the pages under `start_url`.
///
/// Pathways of a level are visited in page order; each contributes its
/// lessons, in page order, under a folder named after the pathway.
///
/// # Errors
///
/// Returns [`NavigationError`] for unusable start URLs, failed page fetches,
/// or a start page yielding no lessons.
#[instrument(skip(fetcher))]
pub async fn create_stack<F>(fetcher: &F, start_url: &str) -> Result<DownloadStack, NavigationError>
where
    F: PageFetcher + ?Sized,
{
    let start = classify_start_url(start_url)?;
    let mut stack = DownloadStack::new(start_url);

    match start {
        StartPoint::Level { url, level } => {
            let body = fetcher.fetch_page(url.as_str()).await?;
            let pathways = pathway_links(&body, &url);
            info!(level = %level, pathways = pathways.len(), "enumerating level");
            for pathway in pathways {
                let folder = path_segments(&pathway)
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                add_pathway(fetcher, &mut stack, &pathway, &folder).await?;
            }
        }
        StartPoint::Pathway { url, folder } => {
            add_pathway(fetcher, &mut stack, &url, &folder).await?;
        }
        StartPoint::Lesson { url, folder } => {
            let body = fetcher.fetch_page(url.as_str()).await?;
            let lessons = course_option_links(&body, &url);
            push_lessons(&mut stack, lessons, &folder);
        }
    }

    if stack.is_empty() {
        return Err(NavigationError::NoLessons {
            url: start_url.to_string(),
        });
    }

    info!(lessons = stack.len(), "download stack created");
    Ok(stack)
}

async fn add_pathway<F>(
    fetcher: &F,
    stack: &mut DownloadStack,
    pathway: &Url,
    folder: &str,
) -> Result<(), NavigationError>
where
    F: PageFetcher + ?Sized,
{
    let body = fetcher.fetch_page(pathway.as_str()).await?;
    let lessons = lesson_links(&body, pathway);
    if lessons.is_empty() {
        warn!(pathway = %pathway, "pathway lists no lessons");
    }
    push_lessons(stack, lessons, folder);
    Ok(())
}

fn push_lessons(stack: &mut DownloadStack, lessons: Vec<Url>, folder: &str) {
    for lesson in lessons {
        if !stack.push(lesson.as_str(), folder) {
            debug!(lesson = %lesson, "lesson already queued under an earlier pathway");
        }
    }
}

fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default()
}

fn same_site(candidate: &Url, page: &Url) -> bool {
    candidate.host_str() == page.host_str() && matches!(candidate.scheme(), "http" | "https")
}

/// Pathway pages linked from a level page.
fn pathway_links(body: &str, page: &Url) -> Vec<Url> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut pathways = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = page.join(href) else {
            continue;
        };
        if !same_site(&url, page) {
            continue;
        }
        let is_pathway = matches!(
            path_segments(&url).as_slice(),
            [LIBRARY_SEGMENT, slug] if !COURSE_LEVELS.contains(slug)
        );
        if !is_pathway {
            continue;
        }
        url.set_query(None);
        url.set_fragment(None);
        if seen.insert(url.as_str().to_string()) {
            pathways.push(url);
        }
    }
    pathways
}

/// Lesson pages linked from a pathway page, query strings kept.
fn lesson_links(body: &str, page: &Url) -> Vec<Url> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let hrefs = document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"));
    collect_lessons(hrefs, page)
}

/// Lesson pages listed in the course `<select>` of a lesson page.
fn course_option_links(body: &str, page: &Url) -> Vec<Url> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("option[value]") else {
        return Vec::new();
    };

    let values = document
        .select(&selector)
        .filter_map(|element| element.value().attr("value"))
        .filter(|value| value.starts_with("/lesson/"));
    collect_lessons(values, page)
}

fn collect_lessons<'a>(hrefs: impl Iterator<Item = &'a str>, page: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut lessons = Vec::new();
    for href in hrefs {
        let Ok(mut url) = page.join(href) else {
            continue;
        };
        if !same_site(&url, page) || !url.path().starts_with("/lesson/") {
            continue;
        }
        url.set_fragment(None);
        if seen.insert(url.as_str().to_string()) {
            lessons.push(url);
        }
    }
    lessons
}

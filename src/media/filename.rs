//! Filename derivation for lesson media and flashcard packages.

use std::collections::HashSet;
use std::path::{Component, Path};

use tracing::debug;
use url::Url;

/// Characters stripped from lesson titles before they become file names.
const TITLE_STRIP_CHARS: &[char] = &[
    '#', '%', '&', '\\', '/', '?', ':', '*', '"', '<', '>', '{', '|', '}',
];

/// Removes characters that are unsafe in file names from a lesson title.
#[must_use]
pub fn sanitize_title(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !TITLE_STRIP_CHARS.contains(c) && !c.is_control())
        .collect();
    make_safe_segment(stripped.trim())
}

/// Sanitizes a single file name taken from a URL.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    make_safe_segment(&sanitized)
}

fn make_safe_segment(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    if is_safe_filename_segment(name) {
        name.to_string()
    } else {
        name.chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Percent-decoded, sanitized final path segment of `url`.
#[must_use]
pub fn last_segment(url: &Url) -> Option<String> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let decoded = urlencoding::decode(last).map_or_else(
        |error| {
            debug!(segment = %last, error = %error, "URL decoding failed, using raw segment");
            last.to_string()
        },
        std::borrow::Cow::into_owned,
    );
    Some(sanitize_filename(&decoded))
}

/// Extension of `name` without the dot, if any.
#[must_use]
pub fn extension(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    (!ext.is_empty()).then_some(ext)
}

/// Package file name for a deck: the sanitized title without whitespace.
#[must_use]
pub fn deck_file_name(title: &str) -> String {
    let compact: String = sanitize_title(title)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() || compact == "_" {
        "deck.apkg".to_string()
    } else {
        format!("{compact}.apkg")
    }
}

/// Hands out file names unique within one lesson.
///
/// A repeated name becomes `name (2).ext`, `name (3).ext`, ... in the order
/// names are claimed. Nothing on disk is consulted, so a re-run plans the same
/// names and overwrites its earlier files.
#[derive(Debug, Default)]
pub struct NameRegistry {
    used: HashSet<String>,
}

impl NameRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `name`, or the first free numbered variant of it.
    pub fn claim(&mut self, name: &str) -> String {
        if self.used.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, ext) = match name.rfind('.') {
            Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
            _ => (name, ""),
        };
        let mut counter = 2_usize;
        loop {
            let candidate = format!("{stem} ({counter}){ext}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

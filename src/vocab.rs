//! Vocabulary extraction from lesson pages.
//!
//! The vocabulary table of a lesson spreads one entry over several elements:
//! the written form, the bracketed pronunciation, the English definition and
//! an audio button. They share nothing but the table row they sit in, so
//! every fragment is attached to the record of its nearest enclosing `<tr>`.
//! Four independent scans fill the records; whatever a scan cannot find is
//! defaulted to an empty string by [`sanity_check`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::media::sanitize_filename;

const PRONUNCIATION_CLASS: &str = "lsn3-lesson-vocabulary__pronunciation";
const DEFINITION_SELECTOR: &str = r#"span.lsn3-lesson-vocabulary__definition[dir="ltr"]"#;
const AUDIO_BUTTON_SELECTOR: &str = r#"button.js-lsn3-play-vocabulary[data-type="audio/mp3"]"#;
const SAMPLE_CONTAINER_SELECTOR: &str =
    "span.lsn3-lesson-vocabulary__sample.js-lsn3-vocabulary-examples";
const SLOW_AUDIO_CELL_SELECTOR: &str = "td.lsn3-lesson-vocabulary__td--play05.play05";

/// Position of a record within one extraction pass.
///
/// Anchors are only meaningful inside the pass that produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowAnchor(usize);

impl RowAnchor {
    /// Index of the record in discovery order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RowAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A record as the scans leave it: any fragment may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRecord {
    /// Written form (kanji and kana).
    pub kana: Option<String>,
    /// Reading with the surrounding brackets removed.
    pub pronunciation: Option<String>,
    /// English meaning.
    pub english_definition: Option<String>,
    /// `[sound:<file>]` reference for the flashcard.
    pub audio_reference: Option<String>,
    /// Audio file name inside the lesson folder.
    pub audio_filename: Option<String>,
}

/// Groups fragments by the row they were found in.
///
/// `K` identifies a row in the source document; every distinct key gets the
/// next [`RowAnchor`].
#[derive(Debug)]
pub struct RowArena<K> {
    anchors: HashMap<K, RowAnchor>,
    records: Vec<PartialRecord>,
}

impl<K: Eq + Hash> Default for RowArena<K> {
    fn default() -> Self {
        Self {
            anchors: HashMap::new(),
            records: Vec::new(),
        }
    }
}

impl<K: Eq + Hash> RowArena<K> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `key`, creating it on first sight.
    pub fn record_for(&mut self, key: K) -> &mut PartialRecord {
        let next = RowAnchor(self.records.len());
        let anchor = *self.anchors.entry(key).or_insert(next);
        if anchor == next {
            self.records.push(PartialRecord::default());
        }
        &mut self.records[anchor.0]
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no fragment has been attached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the arena, yielding records keyed by anchor.
    #[must_use]
    pub fn into_records(self) -> BTreeMap<RowAnchor, PartialRecord> {
        self.records
            .into_iter()
            .enumerate()
            .map(|(index, record)| (RowAnchor(index), record))
            .collect()
    }
}

/// Raw result of the four scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    /// Records by anchor, in discovery order.
    pub records: BTreeMap<RowAnchor, PartialRecord>,
    /// Audio URLs as written on the page, in scan order.
    pub media_urls: Vec<String>,
}

/// A vocabulary entry with every field present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabularyRecord {
    /// Written form (kanji and kana).
    pub kana: String,
    /// Reading with the surrounding brackets removed.
    pub pronunciation: String,
    /// English meaning.
    pub english_definition: String,
    /// `[sound:<file>]` reference for the flashcard.
    pub audio_reference: String,
    /// Audio file name inside the lesson folder; empty without audio.
    pub audio_filename: String,
}

/// Field of a vocabulary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabField {
    /// Written form.
    Kana,
    /// Reading.
    Pronunciation,
    /// English meaning.
    EnglishDefinition,
    /// Sound reference.
    AudioReference,
}

impl VocabField {
    /// Field name as shown in warnings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Kana => "kana",
            Self::Pronunciation => "pronunciation",
            Self::EnglishDefinition => "english_definition",
            Self::AudioReference => "audio_reference",
        }
    }
}

impl fmt::Display for VocabField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record lacked a fragment; the field was set to an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("vocabulary entry {anchor} has no {field}")]
pub struct FragmentMissing {
    /// The record concerned.
    pub anchor: RowAnchor,
    /// The field that was defaulted.
    pub field: VocabField,
}

/// Vocabulary of one lesson, ready for a deck.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabularyExtraction {
    /// Complete records by anchor, in discovery order.
    pub records: BTreeMap<RowAnchor, VocabularyRecord>,
    /// Audio URLs to download, in scan order.
    pub media_urls: Vec<String>,
    /// Distinct audio file names referenced by the records.
    pub audio_files: Vec<String>,
    /// Fields that had to be defaulted.
    pub warnings: Vec<FragmentMissing>,
}

/// Runs the four vocabulary scans for the page language `lang`.
#[must_use]
pub fn extract(document: &Html, lang: &str) -> RawExtraction {
    let mut arena = RowArena::new();
    let mut media_urls = Vec::new();

    let lang_spans = format!(r#"span[lang="{lang}"]"#);
    if let Ok(selector) = Selector::parse(&lang_spans) {
        for span in document.select(&selector) {
            if span.value().attr("class").is_none() {
                arena.record_for(row_key(span)).kana = Some(element_text(span));
            }
        }
    }

    let pronunciation_spans = format!("{lang_spans}.{PRONUNCIATION_CLASS}");
    if let Ok(selector) = Selector::parse(&pronunciation_spans) {
        for span in document.select(&selector) {
            arena.record_for(row_key(span)).pronunciation =
                Some(strip_enclosing(&element_text(span)));
        }
    }

    let sample = Selector::parse(SAMPLE_CONTAINER_SELECTOR).ok();
    let slow_audio = Selector::parse(SLOW_AUDIO_CELL_SELECTOR).ok();

    if let Ok(selector) = Selector::parse(DEFINITION_SELECTOR) {
        for span in document.select(&selector) {
            if inside_any(span, &[sample.as_ref()]) {
                continue;
            }
            arena.record_for(row_key(span)).english_definition = Some(element_text(span));
        }
    }

    if let Ok(selector) = Selector::parse(AUDIO_BUTTON_SELECTOR) {
        for button in document.select(&selector) {
            let attrs = button.value();
            if attrs.attr("data-speed").is_some()
                || inside_any(button, &[sample.as_ref(), slow_audio.as_ref()])
            {
                continue;
            }
            let Some(src) = attrs.attr("data-src").map(str::trim) else {
                continue;
            };
            let filename = audio_filename(src);
            media_urls.push(src.to_string());

            let record = arena.record_for(row_key(button));
            record.audio_reference = Some(format!("[sound:{filename}]"));
            record.audio_filename = Some(filename);
        }
    }

    debug!(
        records = arena.len(),
        audio = media_urls.len(),
        "scanned vocabulary"
    );
    RawExtraction {
        records: arena.into_records(),
        media_urls,
    }
}

/// Fills missing fragments with empty strings, one warning per field.
///
/// A missing audio file name is not reported on its own; its absence is
/// already covered by the missing sound reference.
#[must_use]
pub fn sanity_check(raw: RawExtraction) -> VocabularyExtraction {
    let mut warnings = Vec::new();
    let mut audio_files: Vec<String> = Vec::new();
    let mut records = BTreeMap::new();

    for (anchor, partial) in raw.records {
        let mut take = |value: Option<String>, field: VocabField| {
            value.unwrap_or_else(|| {
                warn!(entry = %anchor, field = %field, "vocabulary fragment missing");
                warnings.push(FragmentMissing { anchor, field });
                String::new()
            })
        };
        let record = VocabularyRecord {
            pronunciation: take(partial.pronunciation, VocabField::Pronunciation),
            english_definition: take(partial.english_definition, VocabField::EnglishDefinition),
            kana: take(partial.kana, VocabField::Kana),
            audio_reference: take(partial.audio_reference, VocabField::AudioReference),
            audio_filename: partial.audio_filename.unwrap_or_default(),
        };

        if !record.audio_filename.is_empty() && !audio_files.contains(&record.audio_filename) {
            audio_files.push(record.audio_filename.clone());
        }
        records.insert(anchor, record);
    }

    VocabularyExtraction {
        records,
        media_urls: raw.media_urls,
        audio_files,
        warnings,
    }
}

fn row_key(element: ElementRef<'_>) -> Option<impl Eq + Hash + use<>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "tr")
        .map(|row| row.id())
}

fn inside_any(element: ElementRef<'_>, containers: &[Option<&Selector>]) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| {
            containers
                .iter()
                .flatten()
                .any(|selector| selector.matches(&ancestor))
        })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Drops exactly one leading and one trailing character, e.g. `(かな)` -> `かな`.
fn strip_enclosing(text: &str) -> String {
    let mut chars = text.trim().chars();
    chars.next();
    chars.next_back();
    chars.as_str().trim().to_string()
}

fn audio_filename(src: &str) -> String {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let last = path.rsplit('/').next().unwrap_or(path);
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    sanitize_filename(&decoded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const VOCAB_TABLE: &str = r#"
        <table><tbody>
          <tr>
            <td class="lsn3-lesson-vocabulary__td--play05 play05">
              <button class="js-lsn3-play-vocabulary" data-type="audio/mp3"
                      data-src="https://cdn/x/slow_01.mp3"></button>
            </td>
            <td>
              <button class="js-lsn3-play-vocabulary" data-type="audio/mp3"
                      data-src="https://cdn/x/review_audio_03.mp3"></button>
              <button class="js-lsn3-play-vocabulary" data-type="audio/mp3" data-speed="0.5"
                      data-src="https://cdn/x/slow_02.mp3"></button>
            </td>
            <td>
              <span lang="ja">医者</span>
              <span lang="ja" class="lsn3-lesson-vocabulary__pronunciation"> (いしゃ) </span>
              <span class="lsn3-lesson-vocabulary__definition" dir="ltr"> doctor </span>
              <span class="lsn3-lesson-vocabulary__sample js-lsn3-vocabulary-examples">
                <span lang="ja" class="lsn3-lesson-vocabulary__term">医者です。</span>
                <span class="lsn3-lesson-vocabulary__definition" dir="ltr">It's the doctor.</span>
                <button class="js-lsn3-play-vocabulary" data-type="audio/mp3"
                        data-src="https://cdn/x/sample_01.mp3"></button>
              </span>
            </td>
          </tr>
          <tr>
            <td>
              <span lang="ja">学生</span>
              <span class="lsn3-lesson-vocabulary__definition" dir="ltr">student</span>
            </td>
          </tr>
        </tbody></table>
    "#;

    #[test]
    fn test_row_arena_assigns_anchors_in_first_seen_order() {
        let mut arena = RowArena::new();
        arena.record_for("b").kana = Some("b".to_string());
        arena.record_for("a").kana = Some("a".to_string());
        arena.record_for("b").pronunciation = Some("bb".to_string());

        let records = arena.into_records();
        let kana: Vec<_> = records.values().map(|r| r.kana.clone().unwrap()).collect();
        assert_eq!(kana, vec!["b", "a"]);
        assert_eq!(records[&RowAnchor(0)].pronunciation.as_deref(), Some("bb"));
    }

    #[test]
    fn test_strip_enclosing() {
        assert_eq!(strip_enclosing(" (いしゃ) "), "いしゃ");
        assert_eq!(strip_enclosing("[ a b ]"), "a b");
        assert_eq!(strip_enclosing("x"), "");
        assert_eq!(strip_enclosing(""), "");
    }

    #[test]
    fn test_audio_filename_is_last_segment() {
        assert_eq!(
            audio_filename("https://cdn/x/review_audio_03.mp3"),
            "review_audio_03.mp3"
        );
        assert_eq!(audio_filename("https://cdn/x/a%20b.mp3?sig=1"), "a b.mp3");
    }

    #[test]
    fn test_extract_groups_fragments_by_row() {
        let document = Html::parse_document(VOCAB_TABLE);
        let raw = extract(&document, "ja");

        assert_eq!(raw.records.len(), 2);
        assert_eq!(raw.media_urls, vec!["https://cdn/x/review_audio_03.mp3"]);

        let first = &raw.records[&RowAnchor(0)];
        assert_eq!(first.kana.as_deref(), Some("医者"));
        assert_eq!(first.pronunciation.as_deref(), Some("いしゃ"));
        assert_eq!(first.english_definition.as_deref(), Some("doctor"));
        assert_eq!(first.audio_reference.as_deref(), Some("[sound:review_audio_03.mp3]"));
        assert_eq!(first.audio_filename.as_deref(), Some("review_audio_03.mp3"));
    }

    #[test]
    fn test_sanity_check_fills_missing_fields() {
        let document = Html::parse_document(VOCAB_TABLE);
        let checked = sanity_check(extract(&document, "ja"));

        assert_eq!(checked.records.len(), 2);
        let second = &checked.records[&RowAnchor(1)];
        assert_eq!(second.kana, "学生");
        assert_eq!(second.pronunciation, "");
        assert_eq!(second.audio_reference, "");
        assert_eq!(second.audio_filename, "");

        let missing: Vec<VocabField> = checked.warnings.iter().map(|w| w.field).collect();
        assert_eq!(
            missing,
            vec![VocabField::Pronunciation, VocabField::AudioReference]
        );
        assert_eq!(checked.audio_files, vec!["review_audio_03.mp3"]);
    }

    #[test]
    fn test_fragments_outside_rows_share_one_record() {
        let document = Html::parse_document(
            r#"<div><span lang="ja">水</span>
               <span class="lsn3-lesson-vocabulary__definition" dir="ltr">water</span></div>"#,
        );
        let checked = sanity_check(extract(&document, "ja"));
        assert_eq!(checked.records.len(), 1);
        let only = &checked.records[&RowAnchor(0)];
        assert_eq!(only.kana, "水");
        assert_eq!(only.english_definition, "water");
    }

    #[test]
    fn test_empty_document_has_no_records() {
        let document = Html::parse_document("<html></html>");
        let checked = sanity_check(extract(&document, "ja"));
        assert!(checked.records.is_empty());
        assert!(checked.warnings.is_empty());
    }
}

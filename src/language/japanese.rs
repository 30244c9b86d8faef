use super::Language;
use crate::deck::{CardTemplate, NoteModel};

/// Note model shared by every Japanese deck; importing again updates it.
const MODEL_ID: i64 = 12_938_895;
const MODEL_NAME: &str = "Basic (and reversed card) (genanki)";
const CARD_CSS: &str = ".card {\n font-family: arial;\n font-size: 20px;\n text-align: center;\n color: black;\n background-color: white;\n}\n";

/// Rules for japanesepod101.com.
#[derive(Debug, Clone, Copy, Default)]
pub struct Japanese;

impl Language for Japanese {
    fn name(&self) -> &'static str {
        "Japanese"
    }

    fn lang_code(&self) -> &'static str {
        "ja"
    }

    fn note_model(&self) -> NoteModel {
        NoteModel {
            id: MODEL_ID,
            name: MODEL_NAME.to_string(),
            fields: ["Kana", "English", "Kanji", "Audio"]
                .into_iter()
                .map(String::from)
                .collect(),
            templates: vec![
                CardTemplate::new(
                    "Card 1",
                    "{{Kanji}}",
                    "{{FrontSide}}\n\n<hr id=answer>\n\n{{Kana}}{{Audio}}<br>{{English}}",
                ),
                CardTemplate::new(
                    "Card 2",
                    "{{English}}",
                    "{{FrontSide}}\n\n<hr id=answer>\n\n{{Kanji}}<br>{{Kana}}{{Audio}}",
                ),
            ],
            css: CARD_CSS.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    #[test]
    fn test_cards_follow_written_form_and_meaning() {
        let model = Japanese.note_model();
        assert_eq!(model.required_fields(), vec![vec![2], vec![1]]);
    }

    #[test]
    fn test_scrape_uses_ja_spans() {
        let page = Html::parse_document(
            r#"<table><tr>
                <td><span lang="ja">猫</span></td>
                <td><span lang="ja" class="lsn3-lesson-vocabulary__pronunciation">(ねこ)</span></td>
                <td><span class="lsn3-lesson-vocabulary__definition" dir="ltr">cat</span></td>
            </tr></table>"#,
        );
        let extraction = Japanese.scrape(&page);
        let record = extraction.records.values().next().cloned().unwrap_or_default();
        assert_eq!(record.kana, "猫");
        assert_eq!(record.pronunciation, "ねこ");
        assert_eq!(record.english_definition, "cat");
        assert_eq!(extraction.warnings.len(), 1, "only the audio is missing");
    }
}

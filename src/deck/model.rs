//! Note models: the fields of a note and the cards generated from them.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

/// `{{Field}}` references in a template, with optional filters (`{{text:Field}}`).
#[allow(clippy::expect_used)]
static FIELD_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}#^/]+?)\}\}").expect("field reference regex is valid") // Static pattern, safe to panic
});

const LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";
const LATEX_POST: &str = "\\end{document}";

/// One card type of a note model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTemplate {
    /// Template name shown in the card browser.
    pub name: String,
    /// Question side.
    pub qfmt: String,
    /// Answer side.
    pub afmt: String,
}

impl CardTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(name: impl Into<String>, qfmt: impl Into<String>, afmt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qfmt: qfmt.into(),
            afmt: afmt.into(),
        }
    }
}

/// A note type: ordered fields plus the card templates rendered from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteModel {
    /// Fixed identifier; importing twice updates instead of duplicating.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Field names in storage order.
    pub fields: Vec<String>,
    /// Card templates in ordinal order.
    pub templates: Vec<CardTemplate>,
    /// Stylesheet shared by every card.
    pub css: String,
}

impl NoteModel {
    /// Indices of the fields each template's question side refers to.
    ///
    /// A card is generated only when all of them are non-empty. References to
    /// unknown names (such as `FrontSide`) are ignored.
    #[must_use]
    pub fn required_fields(&self) -> Vec<Vec<usize>> {
        self.templates
            .iter()
            .map(|template| {
                let mut required = Vec::new();
                for capture in FIELD_REFERENCE.captures_iter(&template.qfmt) {
                    let reference = capture[1].trim();
                    let name = reference.rsplit(':').next().unwrap_or(reference);
                    if let Some(index) = self.fields.iter().position(|field| field == name)
                        && !required.contains(&index)
                    {
                        required.push(index);
                    }
                }
                required
            })
            .collect()
    }

    /// Ordinals of the templates that produce a card for `values`.
    #[must_use]
    pub fn card_ordinals(&self, values: &[String]) -> Vec<usize> {
        self.required_fields()
            .into_iter()
            .enumerate()
            .filter(|(_, required)| {
                !required.is_empty()
                    && required.iter().all(|&index| {
                        values
                            .get(index)
                            .is_some_and(|value| !value.trim().is_empty())
                    })
            })
            .map(|(ordinal, _)| ordinal)
            .collect()
    }

    /// The model as stored in the `models` column of a collection.
    pub(crate) fn to_collection_json(&self, deck_id: i64, modified_secs: i64) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .enumerate()
            .map(|(ord, name)| {
                json!({
                    "name": name,
                    "ord": ord,
                    "sticky": false,
                    "rtl": false,
                    "font": "Arial",
                    "size": 20,
                    "media": [],
                })
            })
            .collect();
        let templates: Vec<Value> = self
            .templates
            .iter()
            .enumerate()
            .map(|(ord, template)| {
                json!({
                    "name": template.name,
                    "ord": ord,
                    "qfmt": template.qfmt,
                    "afmt": template.afmt,
                    "did": null,
                    "bqfmt": "",
                    "bafmt": "",
                })
            })
            .collect();
        let req: Vec<Value> = self
            .required_fields()
            .into_iter()
            .enumerate()
            .map(|(ord, required)| json!([ord, "all", required]))
            .collect();

        json!({
            "id": self.id,
            "name": self.name,
            "type": 0,
            "mod": modified_secs,
            "usn": -1,
            "sortf": 0,
            "did": deck_id,
            "tmpls": templates,
            "flds": fields,
            "css": self.css,
            "latexPre": LATEX_PRE,
            "latexPost": LATEX_POST,
            "tags": [],
            "vers": [],
            "req": req,
        })
    }
}

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::document::LabelDocument;

/// Label sections that carry manufacturing attribution statements, in
/// priority order. Later sections often repeat earlier boilerplate verbatim,
/// which the dedup guard below suppresses.
const SEARCH_SECTIONS: &[&str] = &[
    "spl_unclassified_section",
    "spl_medguide",
    "information_for_patients",
    "spl_patient_package_insert",
    "how_supplied",
    "package_label_principal_display_panel",
];

static SPACE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Concatenate the attribution-bearing sections of a label into a single
/// normalized corpus, paragraph breaks preserved as blank lines. Sections
/// whose cleaned text is byte-identical to one already appended contribute
/// nothing, so repeated boilerplate never double-matches downstream.
pub fn build_corpus(doc: &LabelDocument) -> String {
    let mut corpus = String::new();
    let mut seen: HashSet<String> = HashSet::new();

    for key in SEARCH_SECTIONS {
        let Some(text) = doc.section_text(key) else { continue };
        let cleaned = normalize(&text);
        if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
            continue;
        }
        if !corpus.is_empty() {
            corpus.push_str("\n\n");
        }
        corpus.push_str(&cleaned);
    }

    corpus
}

/// Clean up OCR/encoding artifacts common in SPL text: non-breaking spaces,
/// smart quotes, en/em dashes, CR line endings, runs of spaces.
fn normalize(raw: &str) -> String {
    let raw = raw.replace("\r\n", "\n");
    let mut s = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\u{a0}' => s.push(' '),
            '\r' => s.push('\n'),
            '\u{2018}' | '\u{2019}' => s.push('\''),
            '\u{201c}' | '\u{201d}' => s.push('"'),
            '\u{2013}' | '\u{2014}' => s.push('-'),
            _ => s.push(ch),
        }
    }
    let s = SPACE_RUN_RE.replace_all(&s, " ");
    let s = BLANK_RUN_RE.replace_all(&s, "\n\n");
    s.trim().to_string()
}

// ── Tests ──

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use super::document::LabelDocument;

static NDC_FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d[\d-]*\d$").unwrap());
static NDC_IN_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)NDC\s*:*\s*([\d-]+)").unwrap());

/// One extracted product record, keyed by the label's SPL document id.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub spl_id: String,
    pub set_id: Option<String>,
    pub product_ndc: Option<String>,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    pub labeler_name: Option<String>,
    pub manufactured_by: Option<String>,
    pub manufactured_by_country: Option<String>,
    pub manufactured_for: Option<String>,
    pub manufactured_for_country: Option<String>,
    pub effective_time: Option<String>,
}

impl ProductRow {
    /// The tariff-list criterion: a known manufacturing country other than USA.
    pub fn is_foreign(&self) -> bool {
        self.manufactured_by_country
            .as_deref()
            .is_some_and(|c| !c.eq_ignore_ascii_case("USA"))
    }
}

/// Locate the product NDC, checking the usual locations in order of trust.
/// Harmonized openfda data first, then the raw top-level field, then the
/// trailing segment of the SPL document id, then a regex sweep of the
/// how-supplied text. Alphanumeric candidates are rejected outright.
pub fn find_best_ndc(doc: &LabelDocument) -> Option<String> {
    if let Some(ndc) = doc.openfda_first("product_ndc").filter(|s| is_ndc_format(s)) {
        return Some(ndc.to_string());
    }
    if let Some(ndc) = doc.first_of("product_ndc").filter(|s| is_ndc_format(s)) {
        return Some(ndc.to_string());
    }
    if let Some(tail) = doc.id().and_then(|id| id.split('_').next_back()) {
        if is_ndc_format(tail) {
            return Some(tail.to_string());
        }
    }
    if let Some(text) = doc.section_text("how_supplied") {
        if let Some(caps) = NDC_IN_TEXT_RE.captures(&text) {
            let candidate = &caps[1];
            if is_ndc_format(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn is_ndc_format(s: &str) -> bool {
    NDC_FORMAT_RE.is_match(s) && s.contains('-')
}

/// Prefer the harmonized generic name; openFDA sometimes stuffs a whole
/// ingredient list in there, so anything over five words falls back to the
/// brand name.
pub fn pick_generic_name(doc: &LabelDocument) -> Option<String> {
    doc.openfda_first("generic_name")
        .filter(|g| g.split_whitespace().count() <= 5)
        .or_else(|| doc.openfda_first("brand_name"))
        .map(str::to_string)
}

/// SPL effective_time is a bare YYYYMMDD string; render it as an ISO date.
pub fn parse_effective_time(doc: &LabelDocument) -> Option<String> {
    let raw = doc.effective_time()?;
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ndc_prefers_openfda() {
        let doc = LabelDocument::new(json!({
            "id": "abcd_9999-888",
            "product_ndc": ["5555-444"],
            "openfda": { "product_ndc": ["1111-222"] },
        }));
        assert_eq!(find_best_ndc(&doc).as_deref(), Some("1111-222"));
    }

    #[test]
    fn ndc_falls_back_to_top_level_then_id() {
        let doc = LabelDocument::new(json!({
            "id": "abcd_9999-888",
            "product_ndc": ["5555-444"],
        }));
        assert_eq!(find_best_ndc(&doc).as_deref(), Some("5555-444"));

        let doc = LabelDocument::new(json!({ "id": "abcd_9999-888" }));
        assert_eq!(find_best_ndc(&doc).as_deref(), Some("9999-888"));
    }

    #[test]
    fn ndc_from_how_supplied_text() {
        let doc = LabelDocument::new(json!({
            "id": "not-an-ndc-tail",
            "how_supplied": ["Supplied as NDC: 12345-678-90 in bottles of 30."],
        }));
        assert_eq!(find_best_ndc(&doc).as_deref(), Some("12345-678-90"));
    }

    #[test]
    fn alphanumeric_and_hyphenless_candidates_rejected() {
        assert!(!is_ndc_format("a1234-567"));
        assert!(!is_ndc_format("1234567890"));
        assert!(!is_ndc_format("1234-567-"));
        assert!(is_ndc_format("1234-567"));

        let doc = LabelDocument::new(json!({
            "openfda": { "product_ndc": ["NDC1234-567"] },
        }));
        assert_eq!(find_best_ndc(&doc), None);
    }

    #[test]
    fn generic_name_falls_back_to_brand_when_too_long() {
        let doc = LabelDocument::new(json!({
            "openfda": {
                "generic_name": ["octinoxate, octisalate, oxybenzone, avobenzone, homosalate and octocrylene"],
                "brand_name": ["SunRight 50"],
            },
        }));
        assert_eq!(pick_generic_name(&doc).as_deref(), Some("SunRight 50"));

        let doc = LabelDocument::new(json!({
            "openfda": { "generic_name": ["examplinib"], "brand_name": ["Examplin"] },
        }));
        assert_eq!(pick_generic_name(&doc).as_deref(), Some("examplinib"));
    }

    #[test]
    fn effective_time_formats_as_iso() {
        let doc = LabelDocument::new(json!({ "effective_time": "20240115" }));
        assert_eq!(parse_effective_time(&doc).as_deref(), Some("2024-01-15"));

        let doc = LabelDocument::new(json!({ "effective_time": "2024" }));
        assert_eq!(parse_effective_time(&doc), None);
    }
}

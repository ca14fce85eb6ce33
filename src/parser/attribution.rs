use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Attribution phrases. FOR-phrases and BY-phrases are disjoint. Bare "by" is
/// ambiguous with the ordinary preposition, so the scan loop accepts it only
/// when capitalized or followed by an explicit colon.
static PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?i:manufactured\s+for|mfd\.?\s+for|mfr\.?\s+for|manufactured\s+by|mfd\.?\s+by|mfr\.?\s+by|distributed\s+by|marketed\s+by)|[Bb][Yy])\b([:\s]*)",
    )
    .unwrap()
});

static PARA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

static STATE_ZIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(AL|AK|AZ|AR|CA|CO|CT|DE|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY)\s+\d{5}",
    )
    .unwrap()
});

// Trailing "<word(s)> - <digits>" address-code suffixes, e.g. "Hyderabad - 500 090".
static ADDR_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[\w\s]+\s*-\s*\d+.*$").unwrap());

static TRAIL_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.,;:]\s*$").unwrap());

/// Non-US countries commonly named in manufacturing statements. Matched as
/// case-insensitive substrings of the attribution line.
const FOREIGN_COUNTRIES: &[&str] = &[
    "India",
    "Ireland",
    "Germany",
    "Switzerland",
    "Japan",
    "China",
    "Korea",
    "Italy",
    "France",
    "Canada",
    "Spain",
    "Cayman Islands",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionRecord {
    pub entity_name: String,
    pub country: Option<String>,
}

/// Result of scanning one label: at most one record per role, first match in
/// document order wins. Empty slots mean no confident attribution was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributions {
    pub manufactured_by: Option<AttributionRecord>,
    pub manufactured_for: Option<AttributionRecord>,
}

/// Scan a normalized text corpus for manufacturing attribution statements.
///
/// Each phrase occurrence captures the text up to the next phrase occurrence,
/// the next blank line, or end of corpus, whichever comes first. The earliest
/// attribution statement in a label is the FDA-mandated primary one, so a
/// filled slot is never overwritten by a later, noisier match.
pub fn extract(corpus: &str) -> Attributions {
    let mut out = Attributions::default();
    if corpus.trim().is_empty() {
        return out;
    }

    struct Mark<'a> {
        start: usize,
        capture_start: usize,
        phrase: &'a str,
        has_colon: bool,
    }

    let marks: Vec<Mark> = PHRASE_RE
        .captures_iter(corpus)
        .map(|caps| {
            let whole = caps.get(0).unwrap();
            Mark {
                start: whole.start(),
                capture_start: whole.end(),
                phrase: caps.get(1).unwrap().as_str(),
                has_colon: caps.get(2).map_or(false, |m| m.as_str().contains(':')),
            }
        })
        .collect();

    for (i, mark) in marks.iter().enumerate() {
        let region_end = marks.get(i + 1).map_or(corpus.len(), |next| next.start);
        let mut block = &corpus[mark.capture_start.min(region_end)..region_end];
        if let Some(para) = PARA_RE.find(block) {
            block = &block[..para.start()];
        }

        // An explicit colon always marks an attribution. Without one, bare
        // lowercase "by" is an ordinary preposition, and a capitalized "By"
        // with a long tail is heading prose rather than a marker.
        let bare_by = mark.phrase.eq_ignore_ascii_case("by");
        if bare_by
            && !mark.has_colon
            && (!mark.phrase.starts_with('B') || block.split_whitespace().count() > 5)
        {
            continue;
        }

        let Some((entity_name, country)) = extract_entity(block) else {
            continue;
        };

        let slot = if mark.phrase.to_ascii_lowercase().ends_with("for") {
            &mut out.manufactured_for
        } else {
            &mut out.manufactured_by
        };
        if slot.is_none() {
            *slot = Some(AttributionRecord { entity_name, country });
        }
    }

    out
}

/// Pull an entity name and best-effort country out of a captured block.
/// Only the first line is considered; later lines are usually unrelated
/// label text. Returns None when no plausible name survives cleaning.
fn extract_entity(block: &str) -> Option<(String, Option<String>)> {
    let first_line = block.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return None;
    }

    let country: Option<&str> = if STATE_ZIP_RE.is_match(first_line)
        || contains_ci(first_line, "USA")
        || contains_ci(first_line, "U.S.A")
    {
        Some("USA")
    } else {
        // When a line names several listed countries, the last list entry
        // that matches wins.
        FOREIGN_COUNTRIES
            .iter()
            .copied()
            .rev()
            .find(|c| contains_ci(first_line, c))
    };

    // Everything before the country token's last occurrence is the address
    // part worth keeping; a state+ZIP hit without a literal "USA" leaves the
    // line intact for the comma heuristic below.
    let mut name = first_line;
    if let Some(c) = country {
        if let Some(idx) = rfind_ci(first_line, c) {
            name = first_line[..idx].trim_end();
        }
    }

    let name = ADDR_CODE_RE.replace(name, "");
    // Company name precedes the first comma of an address block.
    let name = name.split(',').next().unwrap_or("").trim();
    let name = TRAIL_PUNCT_RE.replace(name, "");
    let name = name.trim();

    if name.chars().count() > 2 {
        Some((name.to_string(), country.map(str::to_string)))
    } else {
        None
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    rfind_ci(haystack, needle).is_some()
}

/// Byte offset of the last ASCII-case-insensitive occurrence of `needle`.
/// Needles are ASCII constants, so any match lies on char boundaries.
fn rfind_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn by(result: &Attributions) -> &AttributionRecord {
        result.manufactured_by.as_ref().expect("manufactured_by")
    }

    fn for_(result: &Attributions) -> &AttributionRecord {
        result.manufactured_for.as_ref().expect("manufactured_for")
    }

    #[test]
    fn empty_corpus_yields_empty_result() {
        assert_eq!(extract(""), Attributions::default());
        assert_eq!(extract("   \n\n  "), Attributions::default());
    }

    #[test]
    fn no_phrases_yields_empty_result() {
        let r = extract("Store at room temperature. Keep out of reach of children.");
        assert!(r.manufactured_by.is_none());
        assert!(r.manufactured_for.is_none());
    }

    #[test]
    fn foreign_country_detected_and_stripped_from_name() {
        let r = extract("Manufactured by: Acme Pharma, Hyderabad, India");
        assert_eq!(by(&r).entity_name, "Acme Pharma");
        assert_eq!(by(&r).country.as_deref(), Some("India"));
        assert!(!by(&r).entity_name.contains("India"));
    }

    #[test]
    fn state_zip_resolves_usa() {
        let r = extract("Distributed by: MedCo, Boston, MA 02118");
        assert_eq!(by(&r).entity_name, "MedCo");
        assert_eq!(by(&r).country.as_deref(), Some("USA"));
    }

    #[test]
    fn usa_literal_truncates_name() {
        let r = extract("Manufactured by: MedCo Pharmaceuticals, Boston, MA 02118, USA");
        assert_eq!(by(&r).entity_name, "MedCo Pharmaceuticals");
        assert_eq!(by(&r).country.as_deref(), Some("USA"));
    }

    #[test]
    fn first_by_match_wins_over_later_distributed_by() {
        let r = extract(
            "Manufactured by: Acme Pharma, Hyderabad, India\n\nDistributed by: MedCo, Boston, MA 02118",
        );
        assert_eq!(by(&r).entity_name, "Acme Pharma");
        assert_eq!(by(&r).country.as_deref(), Some("India"));
        assert!(r.manufactured_for.is_none());
    }

    #[test]
    fn first_for_match_wins() {
        let r = extract("Manufactured for: Alpha Corp, Dublin, Ireland Mfd. for: Beta LLC");
        assert_eq!(for_(&r).entity_name, "Alpha Corp");
        assert_eq!(for_(&r).country.as_deref(), Some("Ireland"));
    }

    #[test]
    fn explicit_by_colon_accepted_next_to_for() {
        let r = extract("Manufactured for: Global Health Inc. By: ContractMfg LLC");
        assert_eq!(for_(&r).entity_name, "Global Health Inc");
        assert_eq!(by(&r).entity_name, "ContractMfg LLC");
    }

    #[test]
    fn explicit_by_colon_accepted_regardless_of_tail_length() {
        let r = extract("By: Acme Global Contract Manufacturing Services Division");
        assert_eq!(
            by(&r).entity_name,
            "Acme Global Contract Manufacturing Services Division"
        );
    }

    #[test]
    fn lowercase_by_with_colon_accepted() {
        let r = extract("packed by: Sunrise Pharma, Goa, India");
        assert_eq!(by(&r).entity_name, "Sunrise Pharma");
        assert_eq!(by(&r).country.as_deref(), Some("India"));
    }

    #[test]
    fn lowercase_by_without_colon_suppressed_even_with_short_tail() {
        let r = extract("delivered by courier van");
        assert!(r.manufactured_by.is_none());
    }

    #[test]
    fn prose_by_is_not_an_attribution() {
        let r = extract("Shipped by truck to the warehouse on Tuesday by special courier service");
        assert!(r.manufactured_by.is_none());
        assert!(r.manufactured_for.is_none());
    }

    #[test]
    fn capitalized_bare_by_with_long_tail_suppressed() {
        let r = extract("Shipped By truck to the warehouse on Tuesday");
        assert!(r.manufactured_by.is_none());
    }

    #[test]
    fn capitalized_bare_by_with_short_tail_accepted() {
        let r = extract("By Acme Labs");
        assert_eq!(by(&r).entity_name, "Acme Labs");
    }

    #[test]
    fn capture_stops_at_paragraph_boundary() {
        let r = extract("Manufactured by: Acme Pharma\n\nSee your doctor if symptoms persist.");
        assert_eq!(by(&r).entity_name, "Acme Pharma");
    }

    #[test]
    fn only_first_line_of_capture_considered() {
        let r = extract("Manufactured by: Acme Pharma GmbH\nBerlin, Germany");
        assert_eq!(by(&r).entity_name, "Acme Pharma GmbH");
        assert_eq!(by(&r).country, None);
    }

    #[test]
    fn address_code_suffix_stripped() {
        let r = extract("Manufactured by: Acme Pharma, Hyderabad - 500 090");
        assert_eq!(by(&r).entity_name, "Acme Pharma");
    }

    #[test]
    fn abbreviated_phrases_with_optional_period() {
        let r = extract("Mfd by Zed Pharma, Osaka, Japan Mfr. for: Omega Health, Toronto, Canada");
        assert_eq!(by(&r).entity_name, "Zed Pharma");
        assert_eq!(by(&r).country.as_deref(), Some("Japan"));
        assert_eq!(for_(&r).entity_name, "Omega Health");
        assert_eq!(for_(&r).country.as_deref(), Some("Canada"));
    }

    #[test]
    fn multiword_country_title_case() {
        let r = extract("Manufactured by: Island Biologics Ltd., George Town, CAYMAN ISLANDS");
        assert_eq!(by(&r).entity_name, "Island Biologics Ltd");
        assert_eq!(by(&r).country.as_deref(), Some("Cayman Islands"));
    }

    #[test]
    fn later_country_list_entry_wins_on_multi_country_line() {
        let r = extract("Manufactured by: Alpine Labs, Basel, Switzerland, c/o Parma, Italy");
        assert_eq!(by(&r).entity_name, "Alpine Labs");
        assert_eq!(by(&r).country.as_deref(), Some("Italy"));
    }

    #[test]
    fn too_short_name_discarded_without_blocking_later_match() {
        // First BY capture cleans down to nothing; the later one still fills the slot.
        let r = extract("Manufactured by: A1, India Marketed by: Keystone Pharma, Zurich, Switzerland");
        assert_eq!(by(&r).entity_name, "Keystone Pharma");
        assert_eq!(by(&r).country.as_deref(), Some("Switzerland"));
    }

    #[test]
    fn extract_is_idempotent() {
        let corpus = "Manufactured by: Acme Pharma, Hyderabad, India\n\nManufactured for: MedCo, Boston, MA 02118";
        assert_eq!(extract(corpus), extract(corpus));
    }
}

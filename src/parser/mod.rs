pub mod attribution;
pub mod corpus;
pub mod document;
pub mod product;

use anyhow::{Context, Result};

use crate::db::StoredLabel;
use attribution::AttributionRecord;
use document::LabelDocument;
use product::ProductRow;

/// Three-pass pipeline: raw label JSON → text corpus → attributions → product row.
pub fn process_label(label: &StoredLabel) -> Result<ProductRow> {
    let doc = LabelDocument::parse(&label.raw)
        .with_context(|| format!("invalid label JSON for {}", label.spl_id))?;
    Ok(build_product(&label.spl_id, &doc))
}

pub fn build_product(spl_id: &str, doc: &LabelDocument) -> ProductRow {
    let text = corpus::build_corpus(doc);
    let attrs = attribution::extract(&text);
    let (by_name, by_country) = split_record(attrs.manufactured_by);
    let (for_name, for_country) = split_record(attrs.manufactured_for);

    let labeler = doc.openfda_first("manufacturer_name").map(str::to_string);
    // When the label never names a sponsor, the openFDA labeler is the best guess.
    let manufactured_for = for_name.or_else(|| labeler.clone());

    ProductRow {
        spl_id: spl_id.to_string(),
        set_id: doc.set_id().map(str::to_string),
        product_ndc: product::find_best_ndc(doc),
        brand_name: doc.openfda_first("brand_name").map(str::to_string),
        generic_name: product::pick_generic_name(doc),
        labeler_name: labeler,
        manufactured_by: by_name,
        manufactured_by_country: by_country,
        manufactured_for,
        manufactured_for_country: for_country,
        effective_time: product::parse_effective_time(doc),
    }
}

fn split_record(rec: Option<AttributionRecord>) -> (Option<String>, Option<String>) {
    match rec {
        Some(r) => (Some(r.entity_name), r.country),
        None => (None, None),
    }
}

// ── Tests ──

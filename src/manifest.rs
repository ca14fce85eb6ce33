use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::db::PartitionInfo;

const MANIFEST_URL: &str = "https://api.fda.gov/download.json";

/// Fetch the openFDA download manifest and return the drug label partitions.
pub async fn fetch_label_partitions() -> Result<Vec<PartitionInfo>> {
    let client = reqwest::Client::new();

    info!("Fetching download manifest: {}", MANIFEST_URL);
    let manifest: Value = client
        .get(MANIFEST_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("Failed to fetch openFDA download manifest")?;

    let partitions = parse_partitions(&manifest)?;
    info!("Drug label partitions in manifest: {}", partitions.len());
    Ok(partitions)
}

/// Walk results.drug.label.partitions and pull out the export file entries.
fn parse_partitions(manifest: &Value) -> Result<Vec<PartitionInfo>> {
    let entries = manifest
        .pointer("/results/drug/label/partitions")
        .and_then(|v| v.as_array())
        .context("Manifest has no drug label partitions")?;

    let parts = entries
        .iter()
        .filter_map(|entry| {
            let url = entry.get("file")?.as_str()?.to_string();
            let display_name = entry
                .get("display_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&url)
                .to_string();
            Some(PartitionInfo {
                url,
                display_name,
                records: entry.get("records").and_then(|v| v.as_i64()),
                // size_mb arrives as a string like "114.01"
                size_mb: entry
                    .get("size_mb")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| entry.get("size_mb").and_then(|v| v.as_f64())),
            })
        })
        .collect();

    Ok(parts)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partitions_parsed_from_manifest_shape() {
        let manifest = json!({
            "results": { "drug": { "label": { "partitions": [
                { "file": "https://download.open.fda.gov/drug/label/drug-label-0001-of-0012.json.zip",
                  "display_name": "Part 1 of 12", "records": 20000, "size_mb": "114.01" },
                { "file": "https://download.open.fda.gov/drug/label/drug-label-0002-of-0012.json.zip",
                  "display_name": "Part 2 of 12", "records": 20000, "size_mb": "98.40" }
            ] } } }
        });
        let parts = parse_partitions(&manifest).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].url.ends_with("0001-of-0012.json.zip"));
        assert_eq!(parts[0].records, Some(20000));
        assert_eq!(parts[0].size_mb, Some(114.01));
    }

    #[test]
    fn missing_partitions_is_an_error() {
        let manifest = json!({ "results": { "drug": {} } });
        assert!(parse_partitions(&manifest).is_err());
    }

    #[test]
    fn entries_without_file_are_skipped() {
        let manifest = json!({
            "results": { "drug": { "label": { "partitions": [ { "display_name": "broken" } ] } } }
        });
        assert!(parse_partitions(&manifest).unwrap().is_empty());
    }
}

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::QueuedPartition;
use crate::parser::document::LabelDocument;

const CONCURRENCY: usize = 3;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const DOWNLOAD_TIMEOUT_SECS: u64 = 600;
const LABEL_API_URL: &str = "https://api.fda.gov/drug/label.json";

/// Fetch stats returned after completion.
pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub labels: usize,
}

pub struct LabelRow {
    pub spl_id: String,
    pub set_id: Option<String>,
    pub raw: String,
}

struct PartitionResult {
    partition_id: i64,
    display_name: String,
    labels: Vec<LabelRow>,
    error: Option<String>,
    latency_ms: i64,
}

/// Download queued label partitions concurrently, saving each partition's
/// labels to the DB as it completes.
pub async fn fetch_partitions_streaming(
    conn: &Connection,
    parts: Vec<QueuedPartition>,
) -> Result<FetchStats> {
    let client = Arc::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?,
    );
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let total = parts.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send decoded partitions, main loop saves to DB
    let (tx, mut rx) = tokio::sync::mpsc::channel::<PartitionResult>(CONCURRENCY * 2);

    for part in parts {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let start = Instant::now();
            let outcome = fetch_one(&client, &part).await;
            let latency_ms = start.elapsed().as_millis() as i64;

            let msg = match outcome {
                Ok(labels) => PartitionResult {
                    partition_id: part.id,
                    display_name: part.display_name,
                    labels,
                    error: None,
                    latency_ms,
                },
                Err(e) => {
                    warn!("Partition {} failed: {:#}", part.display_name, e);
                    // Send an error result so the partition is still marked fetched
                    PartitionResult {
                        partition_id: part.id,
                        display_name: part.display_name,
                        labels: Vec::new(),
                        error: Some(format!("{:#}", e)),
                        latency_ms,
                    }
                }
            };
            let _ = tx.send(msg).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    let mut label_count = 0usize;

    // Prepare statements once, reuse for each partition
    let mut insert_stmt = conn.prepare(
        "INSERT OR IGNORE INTO labels (partition_id, spl_id, set_id, raw)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut update_stmt = conn.prepare(
        "UPDATE partitions
         SET fetched = 1, fetched_at = datetime('now'), error = ?2, latency_ms = ?3
         WHERE id = ?1",
    )?;

    while let Some(res) = rx.recv().await {
        if res.error.is_some() {
            errors += 1;
        } else {
            ok += 1;
        }
        label_count += res.labels.len();

        save_one(conn, &mut insert_stmt, &mut update_stmt, &res)?;
        info!(
            "Partition {}: {} labels in {:.1}s",
            res.display_name,
            res.labels.len(),
            res.latency_ms as f64 / 1000.0
        );
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Fetched {} partitions ({} ok, {} errors), {} labels",
        total, ok, errors, label_count
    );

    Ok(FetchStats { total, ok, errors, labels: label_count })
}

/// Save one decoded partition using pre-prepared statements.
fn save_one(
    conn: &Connection,
    insert: &mut rusqlite::Statement,
    update: &mut rusqlite::Statement,
    res: &PartitionResult,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for label in &res.labels {
        insert.execute(rusqlite::params![
            res.partition_id,
            label.spl_id,
            label.set_id,
            label.raw,
        ])?;
    }
    update.execute(rusqlite::params![res.partition_id, res.error, res.latency_ms])?;
    tx.commit()?;
    Ok(())
}

async fn fetch_one(client: &reqwest::Client, part: &QueuedPartition) -> Result<Vec<LabelRow>> {
    let bytes = download_with_retry(client, &part.url, &part.display_name).await?;
    // Decompression and JSON parsing of a multi-hundred-MB partition is CPU
    // bound; keep it off the async workers.
    tokio::task::spawn_blocking(move || decode_partition(&bytes))
        .await
        .context("decode task panicked")?
}

async fn download_with_retry(client: &reqwest::Client, url: &str, name: &str) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match download_once(client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Transient error on {} (attempt {}/{}), backing off {:.1}s: {}",
                    name,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64(),
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn download_once(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
        }
        None => false,
    }
}

/// A partition is a zip archive holding a single JSON file shaped like an API
/// response: { meta: ..., results: [label, label, ...] }.
fn decode_partition(bytes: &[u8]) -> Result<Vec<LabelRow>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("not a zip archive")?;
    if archive.len() == 0 {
        return Err(anyhow!("empty zip archive"));
    }
    let mut file = archive.by_index(0)?;
    let mut json = String::with_capacity(file.size() as usize);
    file.read_to_string(&mut json)?;

    let value: Value = serde_json::from_str(&json).context("partition JSON did not parse")?;
    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .context("partition JSON has no results array")?;

    // Labels without an SPL id cannot be keyed; skip them.
    let rows = results
        .iter()
        .filter_map(|label| {
            let spl_id = label.get("id")?.as_str()?.to_string();
            let set_id = label.get("set_id").and_then(|v| v.as_str()).map(str::to_string);
            Some(LabelRow { spl_id, set_id, raw: label.to_string() })
        })
        .collect();

    Ok(rows)
}

/// Query the label API for a single document, e.g. by brand name or NDC.
pub async fn fetch_single_label(search: &str) -> Result<LabelDocument> {
    let client = reqwest::Client::new();
    let body: Value = client
        .get(LABEL_API_URL)
        .query(&[("search", search), ("limit", "1")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("openFDA label query failed")?;

    let label = body
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .ok_or_else(|| anyhow!("No label matched query: {}", search))?;

    Ok(LabelDocument::new(label))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_of(json: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("drug-label-0001-of-0001.json", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(json.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn decode_partition_extracts_label_rows() {
        let bytes = zip_of(
            r#"{ "meta": {}, "results": [
                { "id": "spl-1", "set_id": "set-1", "how_supplied": ["x"] },
                { "id": "spl-2" },
                { "set_id": "no-id-gets-skipped" }
            ]}"#,
        );
        let rows = decode_partition(&bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].spl_id, "spl-1");
        assert_eq!(rows[0].set_id.as_deref(), Some("set-1"));
        assert!(rows[0].raw.contains("how_supplied"));
        assert_eq!(rows[1].set_id, None);
    }

    #[test]
    fn decode_partition_rejects_garbage() {
        assert!(decode_partition(b"not a zip").is_err());
        let bytes = zip_of(r#"{ "meta": {} }"#);
        assert!(decode_partition(&bytes).is_err());
    }
}

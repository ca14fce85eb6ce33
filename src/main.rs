mod db;
mod fetch;
mod manifest;
mod parser;

use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rx_origin", about = "Drug manufacturing-origin extractor over openFDA labels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the openFDA download manifest and populate the partition queue
    Init,
    /// Download queued label partitions into the local DB
    Fetch {
        /// Max partitions to download (default: all unfetched)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract manufacturing attributions from stored labels
    Process {
        /// Max labels to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch + process in one pipeline
    Run {
        /// Max partitions to fetch+process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch one label from the API and print its extracted product
    Lookup {
        /// openFDA search expression, e.g. 'openfda.brand_name:"Keytruda"'
        search: String,
    },
    /// Show fetch/extraction statistics
    Stats,
    /// Extracted products table (foreign-made by default)
    Overview {
        /// Filter by manufacturing country (e.g. "India")
        #[arg(short, long)]
        country: Option<String>,
        /// Include US-made and unknown-origin products
        #[arg(long)]
        all: bool,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let parts = manifest::fetch_label_partitions().await?;
            let inserted = db::insert_partitions(&conn, &parts)?;
            println!(
                "Queued {} new partitions ({} total in manifest)",
                inserted,
                parts.len()
            );
            Ok(())
        }
        Commands::Fetch { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let parts = db::fetch_unfetched(&conn, limit)?;
            if parts.is_empty() {
                println!("No unfetched partitions. Run 'init' first or all partitions are fetched.");
                return Ok(());
            }
            println!("Fetching {} partitions (streaming to DB)...", parts.len());
            let stats = fetch::fetch_partitions_streaming(&conn, parts).await?;
            println!(
                "Done: {} partitions ({} ok, {} errors), {} labels stored.",
                stats.total, stats.ok, stats.errors, stats.labels
            );
            Ok(())
        }
        Commands::Process { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let labels = db::fetch_unextracted(&conn, limit)?;
            if labels.is_empty() {
                println!("No unprocessed labels. Run 'fetch' first.");
                return Ok(());
            }
            println!("Processing {} labels...", labels.len());
            let counts = process_labels(&conn, &labels)?;
            counts.print();
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let parts = db::fetch_unfetched(&conn, limit)?;
            if parts.is_empty() {
                println!("No unfetched partitions. Run 'init' first.");
                return Ok(());
            }

            // Phase 1: Fetch (streaming to DB)
            let t_fetch = Instant::now();
            println!("Pipeline: fetching {} partitions (streaming to DB)...", parts.len());
            let stats = fetch::fetch_partitions_streaming(&conn, parts).await?;
            println!(
                "Fetched {} partitions ({} ok, {} errors) in {:.1}s",
                stats.total,
                stats.ok,
                stats.errors,
                t_fetch.elapsed().as_secs_f64()
            );

            // Phase 2: Process
            let t_process = Instant::now();
            let labels = db::fetch_unextracted(&conn, None)?;
            if labels.is_empty() {
                println!("Nothing to process (all fetched partitions were empty or errored).");
                return Ok(());
            }
            println!("Processing {} labels...", labels.len());
            let counts = process_labels(&conn, &labels)?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            counts.print();
            Ok(())
        }
        Commands::Lookup { search } => {
            let doc = fetch::fetch_single_label(&search).await?;
            let spl_id = doc.id().unwrap_or("unknown").to_string();
            let product = parser::build_product(&spl_id, &doc);
            println!("{}", serde_json::to_string_pretty(&product)?);
            Ok(())
        }
        Commands::Overview { country, all, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, country.as_deref(), all, limit)?;
            if rows.is_empty() {
                println!("No products found.");
                return Ok(());
            }

            // Compact, readable table
            println!(
                "{:>3} | {:<12} | {:<18} | {:<18} | {:<24} | {:<14} | {:<22}",
                "#", "NDC", "Brand", "Generic", "Manufactured By", "Country", "Manufactured For"
            );
            println!("{}", "-".repeat(128));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<12} | {:<18} | {:<18} | {:<24} | {:<14} | {:<22}",
                    i + 1,
                    truncate(&r.product_ndc, 12),
                    truncate(&r.brand_name, 18),
                    truncate(&r.generic_name, 18),
                    truncate(&r.manufactured_by, 24),
                    truncate(&r.country, 14),
                    truncate(&r.manufactured_for, 22),
                );
            }

            println!("\n{} products", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Partitions:   {}", s.partitions);
            println!("Fetched:      {}", s.fetched);
            println!("Fetch errors: {}", s.fetch_errors);
            println!("Labels:       {}", s.labels);
            println!("Products:     {}", s.products);
            println!("Foreign-made: {}", s.foreign);
            if !s.top_countries.is_empty() {
                println!("\n--- Top origin countries ---");
                for (country, n) in &s.top_countries {
                    println!("  {:<16} {}", country, n);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct ProcessCounts {
    products: usize,
    foreign: usize,
    errors: usize,
}

impl ProcessCounts {
    fn print(&self) {
        println!(
            "Saved {} products ({} foreign-made, {} labels unreadable).",
            self.products, self.foreign, self.errors,
        );
    }
}

fn process_labels(
    conn: &rusqlite::Connection,
    labels: &[db::StoredLabel],
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(labels.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts { products: 0, foreign: 0, errors: 0 };

    for chunk in labels.chunks(500) {
        let results: Vec<_> = chunk.par_iter().map(parser::process_label).collect();

        let mut products = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(p) => {
                    if p.is_foreign() {
                        counts.foreign += 1;
                    }
                    products.push(p);
                }
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    counts.errors += 1;
                }
            }
        }

        counts.products += products.len();
        db::save_products(conn, &products)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

use anyhow::Result;
use rusqlite::Connection;

use crate::parser::product::ProductRow;

const DB_PATH: &str = "data/rx_origin.sqlite";

pub fn connect() -> Result<Connection> {
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS partitions (
            id           INTEGER PRIMARY KEY,
            url          TEXT UNIQUE NOT NULL,
            display_name TEXT NOT NULL,
            records      INTEGER,
            size_mb      REAL,
            fetched      BOOLEAN NOT NULL DEFAULT 0,
            fetched_at   TEXT,
            error        TEXT,
            latency_ms   INTEGER,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_partitions_fetched ON partitions(fetched);

        CREATE TABLE IF NOT EXISTS labels (
            id           INTEGER PRIMARY KEY,
            partition_id INTEGER NOT NULL REFERENCES partitions(id),
            spl_id       TEXT UNIQUE NOT NULL,
            set_id       TEXT,
            raw          TEXT NOT NULL,
            fetched_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_labels_partition ON labels(partition_id);

        -- Extracted structured data
        CREATE TABLE IF NOT EXISTS products (
            spl_id                   TEXT PRIMARY KEY,
            set_id                   TEXT,
            product_ndc              TEXT,
            brand_name               TEXT,
            generic_name             TEXT,
            labeler_name             TEXT,
            manufactured_by          TEXT,
            manufactured_by_country  TEXT,
            manufactured_for         TEXT,
            manufactured_for_country TEXT,
            effective_time           TEXT,
            is_foreign BOOLEAN GENERATED ALWAYS AS (
                manufactured_by_country IS NOT NULL AND manufactured_by_country <> 'USA'
            ) STORED,
            processed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_products_foreign ON products(is_foreign);
        CREATE INDEX IF NOT EXISTS idx_products_country ON products(manufactured_by_country);
        ",
    )?;
    Ok(())
}

// ── Fetch queue ──

pub struct PartitionInfo {
    pub url: String,
    pub display_name: String,
    pub records: Option<i64>,
    pub size_mb: Option<f64>,
}

pub struct QueuedPartition {
    pub id: i64,
    pub url: String,
    pub display_name: String,
}

pub fn insert_partitions(conn: &Connection, parts: &[PartitionInfo]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO partitions (url, display_name, records, size_mb)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for p in parts {
            count += stmt.execute(rusqlite::params![p.url, p.display_name, p.records, p.size_mb])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unfetched(conn: &Connection, limit: Option<usize>) -> Result<Vec<QueuedPartition>> {
    let sql = format!(
        "SELECT id, url, display_name FROM partitions WHERE fetched = 0 ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(QueuedPartition {
                id: row.get(0)?,
                url: row.get(1)?,
                display_name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Processing ──

pub struct StoredLabel {
    pub spl_id: String,
    pub raw: String,
}

pub fn fetch_unextracted(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredLabel>> {
    let sql = format!(
        "SELECT l.spl_id, l.raw
         FROM labels l
         LEFT JOIN products p ON p.spl_id = l.spl_id
         WHERE p.spl_id IS NULL
         ORDER BY l.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredLabel {
                spl_id: row.get(0)?,
                raw: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_products(conn: &Connection, rows: &[ProductRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO products
             (spl_id, set_id, product_ndc, brand_name, generic_name, labeler_name,
              manufactured_by, manufactured_by_country,
              manufactured_for, manufactured_for_country, effective_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for p in rows {
            stmt.execute(rusqlite::params![
                p.spl_id, p.set_id, p.product_ndc, p.brand_name, p.generic_name,
                p.labeler_name, p.manufactured_by, p.manufactured_by_country,
                p.manufactured_for, p.manufactured_for_country, p.effective_time,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Stats & overview ──

pub struct Stats {
    pub partitions: i64,
    pub fetched: i64,
    pub fetch_errors: i64,
    pub labels: i64,
    pub products: i64,
    pub foreign: i64,
    pub top_countries: Vec<(String, i64)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

    let mut stmt = conn.prepare(
        "SELECT manufactured_by_country, COUNT(*) AS n FROM products
         WHERE is_foreign GROUP BY manufactured_by_country ORDER BY n DESC LIMIT 10",
    )?;
    let top_countries = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        partitions: count("SELECT COUNT(*) FROM partitions")?,
        fetched: count("SELECT COUNT(*) FROM partitions WHERE fetched = 1")?,
        fetch_errors: count("SELECT COUNT(*) FROM partitions WHERE error IS NOT NULL")?,
        labels: count("SELECT COUNT(*) FROM labels")?,
        products: count("SELECT COUNT(*) FROM products")?,
        foreign: count("SELECT COUNT(*) FROM products WHERE is_foreign")?,
        top_countries,
    })
}

pub struct OverviewRow {
    pub product_ndc: String,
    pub brand_name: String,
    pub generic_name: String,
    pub manufactured_by: String,
    pub country: String,
    pub manufactured_for: String,
}

pub fn fetch_overview(
    conn: &Connection,
    country: Option<&str>,
    include_domestic: bool,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut sql = String::from(
        "SELECT COALESCE(product_ndc, 'N/A'), COALESCE(brand_name, 'N/A'),
                COALESCE(generic_name, 'N/A'), COALESCE(manufactured_by, 'N/A'),
                COALESCE(manufactured_by_country, '?'), COALESCE(manufactured_for, 'N/A')
         FROM products WHERE 1=1",
    );
    if !include_domestic {
        sql.push_str(" AND is_foreign");
    }
    if country.is_some() {
        sql.push_str(" AND manufactured_by_country = ?1 COLLATE NOCASE");
    }
    sql.push_str(&format!(" ORDER BY effective_time DESC LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<OverviewRow> {
        Ok(OverviewRow {
            product_ndc: row.get(0)?,
            brand_name: row.get(1)?,
            generic_name: row.get(2)?,
            manufactured_by: row.get(3)?,
            country: row.get(4)?,
            manufactured_for: row.get(5)?,
        })
    };
    let rows = match country {
        Some(c) => stmt.query_map([c], map_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

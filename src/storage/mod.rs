//! SQLite observation store -- schema, cohort queries, full-replace writes.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::{AnalysisError, Cohort};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// One weekly row of the `prescriptions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRow {
    pub date: NaiveDate,
    pub product: String,
    pub region: String,
    pub units: i64,
    pub price_per_unit: f64,
    pub revenue: f64,
    /// Ground-truth label; `none` outside labelled events.
    pub event_type: String,
}

impl PrescriptionRow {
    pub fn cohort(&self) -> Cohort {
        Cohort::new(&self.product, &self.region)
    }
}

/// Read rows ordered by (product, region, date). `None` filters match all.
pub fn read_prescriptions(
    pool: &Pool,
    product: Option<&str>,
    region: Option<&str>,
) -> Result<Vec<PrescriptionRow>, AnalysisError> {
    let conn = pool.get()?;

    let mut sql = String::from(
        "SELECT date, product, region, units, price_per_unit, revenue, event_type
         FROM prescriptions WHERE 1=1",
    );
    let mut args: Vec<&str> = Vec::new();
    if let Some(p) = product {
        args.push(p);
        sql.push_str(&format!(" AND product = ?{}", args.len()));
    }
    if let Some(r) = region {
        args.push(r);
        sql.push_str(&format!(" AND region = ?{}", args.len()));
    }
    sql.push_str(" ORDER BY product, region, date");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(PrescriptionRow {
            date: row.get(0)?,
            product: row.get(1)?,
            region: row.get(2)?,
            units: row.get(3)?,
            price_per_unit: row.get(4)?,
            revenue: row.get(5)?,
            event_type: row.get(6)?,
        })
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Replace the whole table with `rows` in one transaction.
pub fn replace_prescriptions(pool: &Pool, rows: &[PrescriptionRow]) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM prescriptions", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO prescriptions
             (date, product, region, units, price_per_unit, revenue, event_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.date,
                row.product,
                row.region,
                row.units,
                row.price_per_unit,
                row.revenue,
                row.event_type
            ])?;
        }
    }
    tx.commit().context("Failed to commit prescriptions")?;

    info!(rows = rows.len(), "replaced prescriptions table");
    Ok(rows.len())
}

/// Distinct cohorts present in the store.
pub fn list_cohorts(pool: &Pool) -> Result<Vec<Cohort>, AnalysisError> {
    let conn = pool.get()?;
    let mut stmt = conn
        .prepare("SELECT DISTINCT product, region FROM prescriptions ORDER BY product, region")?;
    let rows = stmt.query_map([], |row| {
        Ok(Cohort::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

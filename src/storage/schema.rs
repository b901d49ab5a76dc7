//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS prescriptions (
            id INTEGER PRIMARY KEY,
            date TEXT NOT NULL,
            product TEXT NOT NULL,
            region TEXT NOT NULL,
            units INTEGER NOT NULL CHECK (units >= 0),
            price_per_unit REAL NOT NULL CHECK (price_per_unit > 0),
            revenue REAL NOT NULL CHECK (revenue >= 0),
            event_type TEXT NOT NULL DEFAULT 'none'
        );

        CREATE INDEX IF NOT EXISTS idx_prescriptions_cohort
            ON prescriptions(product, region, date);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
